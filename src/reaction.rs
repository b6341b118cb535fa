// 该文件是 Shanan （山南西风） 项目的一部分。
// src/reaction.rs - 入侵判定与响应
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod log;
mod signal;

pub use self::log::{IntruderLog, LogRecord};
pub use self::signal::{NullSignal, ReleaseHandle, SignalError, SignalLine, SysfsGpio};

use tracing::{debug, error, info};

use crate::{detection::Detection, label::LabelTable};

pub const PERSON_LABEL: &str = "person";
pub const DEFAULT_PERSON_ID: u32 = 0;
pub const DEFAULT_MIN_SCORE: f32 = 0.6;
pub const DEFAULT_MIN_AREA: i64 = 30000;
pub const DEFAULT_DISPLAY: (u32, u32) = (640, 480);

/// 入侵判定参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReactionConfig {
  pub person_id: u32,
  pub min_score: f32,
  /// 反归一化后的最小像素面积
  pub min_area: i64,
  /// 反归一化所用的显示分辨率 (宽, 高)
  pub display: (u32, u32),
}

impl Default for ReactionConfig {
  fn default() -> Self {
    Self {
      person_id: DEFAULT_PERSON_ID,
      min_score: DEFAULT_MIN_SCORE,
      min_area: DEFAULT_MIN_AREA,
      display: DEFAULT_DISPLAY,
    }
  }
}

impl ReactionConfig {
  /// 从标签表解析行人类别编号，找不到时保持默认值
  pub fn with_person_label(mut self, labels: &LabelTable, name: &str) -> Self {
    match labels.find(name) {
      Some(id) => self.person_id = id,
      None => debug!("标签表中没有 {}，使用类别 {}", name, self.person_id),
    }
    self
  }
}

/// 单帧的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
  NoIntruder,
  IntruderDetected,
}

/// 单帧响应的汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaction {
  pub state: FrameState,
  /// 满足条件的检测数，即本帧追加的记录数
  pub intruders: usize,
  /// 写入失败的记录数
  pub log_failures: usize,
  /// 本帧写出的电平
  pub signal: bool,
}

/// 逐帧判定，记录入侵并驱动输出引脚
///
/// 每帧都重新评估并重写电平，不做边沿消抖；同一帧中每个满足条件的
/// 检测各追加一条记录。
#[derive(Debug)]
pub struct ReactionPolicy {
  config: ReactionConfig,
  log: IntruderLog,
  /// 最近一次写出的电平
  signal_state: Option<bool>,
}

impl ReactionPolicy {
  pub fn new(config: ReactionConfig, log: IntruderLog) -> Self {
    Self {
      config,
      log,
      signal_state: None,
    }
  }

  pub fn config(&self) -> &ReactionConfig {
    &self.config
  }

  pub fn signal_state(&self) -> Option<bool> {
    self.signal_state
  }

  /// 检测是否满足入侵条件
  pub fn qualifies(&self, detection: &Detection) -> bool {
    let (width, height) = self.config.display;
    detection.class_id == self.config.person_id
      && detection.score >= self.config.min_score
      && detection.pixel_area(width, height) >= self.config.min_area
  }

  pub fn react<S: SignalLine + ?Sized>(
    &mut self,
    detections: &[Detection],
    signal: &mut S,
  ) -> Reaction {
    let mut intruders = 0;
    let mut log_failures = 0;

    for detection in detections {
      if !self.qualifies(detection) {
        debug!(
          "未发现入侵者: 类别 {}, 置信度 {:.2}",
          detection.class_id, detection.score
        );
        continue;
      }

      intruders += 1;
      info!("检测到入侵者，置信度 {:.1}%", detection.score * 100.0);
      if let Err(e) = self.log.append(&LogRecord::now(true)) {
        log_failures += 1;
        error!("写入记录 {} 失败: {}", self.log.path().display(), e);
      }
    }

    let state = if intruders > 0 {
      FrameState::IntruderDetected
    } else {
      FrameState::NoIntruder
    };
    let level = state == FrameState::IntruderDetected;

    if let Err(e) = signal.set(level) {
      error!("写入信号电平失败: {}", e);
    }
    self.signal_state = Some(level);

    Reaction {
      state,
      intruders,
      log_failures,
      signal: level,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::BoundingBox;

  #[derive(Default)]
  struct RecordingSignal {
    levels: Vec<bool>,
  }

  impl SignalLine for RecordingSignal {
    fn set(&mut self, level: bool) -> Result<(), SignalError> {
      self.levels.push(level);
      Ok(())
    }
  }

  fn person(score: f32, extent: f32) -> Detection {
    Detection {
      bounding_box: BoundingBox {
        ymin: 0.1,
        xmin: 0.1,
        ymax: extent,
        xmax: extent,
      },
      class_id: 0,
      score,
    }
  }

  fn policy(dir: &tempfile::TempDir) -> ReactionPolicy {
    ReactionPolicy::new(
      ReactionConfig::default(),
      IntruderLog::new(dir.path().join("intruderList.txt")),
    )
  }

  fn log_lines(dir: &tempfile::TempDir) -> usize {
    std::fs::read_to_string(dir.path().join("intruderList.txt"))
      .map(|c| c.lines().count())
      .unwrap_or(0)
  }

  #[test]
  fn confident_large_person_raises_signal_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let mut policy = policy(&dir);
    let mut signal = RecordingSignal::default();

    let reaction = policy.react(&[person(0.8, 0.5)], &mut signal);
    assert_eq!(reaction.state, FrameState::IntruderDetected);
    assert_eq!(reaction.intruders, 1);
    assert_eq!(signal.levels, vec![true]);
    assert_eq!(log_lines(&dir), 1);
  }

  #[test]
  fn low_score_person_lowers_signal_without_logging() {
    let dir = tempfile::tempdir().unwrap();
    let mut policy = policy(&dir);
    let mut signal = RecordingSignal::default();

    let reaction = policy.react(&[person(0.55, 0.5)], &mut signal);
    assert_eq!(reaction.state, FrameState::NoIntruder);
    assert_eq!(signal.levels, vec![false]);
    assert_eq!(log_lines(&dir), 0);
  }

  #[test]
  fn small_person_does_not_qualify() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(&dir);
    // (0.3-0.1)*640 x (0.3-0.1)*480 = 128 x 96 = 12288
    assert!(!policy.qualifies(&person(0.9, 0.3)));
  }

  #[test]
  fn other_classes_do_not_qualify() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(&dir);
    let mut car = person(0.99, 0.9);
    car.class_id = 2;
    assert!(!policy.qualifies(&car));
  }

  #[test]
  fn boundary_values_are_inclusive() {
    let dir = tempfile::tempdir().unwrap();
    let policy = ReactionPolicy::new(
      ReactionConfig {
        min_area: 100 * 100,
        display: (100, 100),
        ..ReactionConfig::default()
      },
      IntruderLog::new(dir.path().join("log.txt")),
    );
    let full = Detection {
      bounding_box: BoundingBox {
        ymin: 0.0,
        xmin: 0.0,
        ymax: 1.0,
        xmax: 1.0,
      },
      class_id: 0,
      score: 0.6,
    };
    assert!(policy.qualifies(&full));
  }

  #[test]
  fn signal_tracks_each_frame_regardless_of_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut policy = policy(&dir);
    let mut signal = RecordingSignal::default();

    policy.react(&[person(0.8, 0.5)], &mut signal);
    policy.react(&[person(0.8, 0.5)], &mut signal);
    policy.react(&[], &mut signal);
    policy.react(&[person(0.9, 0.6)], &mut signal);

    assert_eq!(signal.levels, vec![true, true, false, true]);
    assert_eq!(policy.signal_state(), Some(true));
    assert_eq!(log_lines(&dir), 3);
  }

  #[test]
  fn one_record_per_qualifying_detection() {
    let dir = tempfile::tempdir().unwrap();
    let mut policy = policy(&dir);
    let mut signal = RecordingSignal::default();

    let reaction = policy.react(
      &[person(0.8, 0.5), person(0.3, 0.5), person(0.95, 0.7)],
      &mut signal,
    );
    assert_eq!(reaction.intruders, 2);
    assert_eq!(signal.levels, vec![true]);
    assert_eq!(log_lines(&dir), 2);
  }

  #[test]
  fn log_failure_does_not_change_signal() {
    let dir = tempfile::tempdir().unwrap();
    let mut policy = ReactionPolicy::new(
      ReactionConfig::default(),
      IntruderLog::new(dir.path().join("missing").join("log.txt")),
    );
    let mut signal = RecordingSignal::default();

    let reaction = policy.react(&[person(0.8, 0.5)], &mut signal);
    assert_eq!(reaction.log_failures, 1);
    assert!(reaction.signal);
    assert_eq!(signal.levels, vec![true]);
  }

  #[test]
  fn person_id_from_labels() {
    let labels = LabelTable::parse("0 background\n1 person\n");
    let config = ReactionConfig::default().with_person_label(&labels, PERSON_LABEL);
    assert_eq!(config.person_id, 1);

    let labels = LabelTable::parse("car\ntruck\n");
    let config = ReactionConfig::default().with_person_label(&labels, PERSON_LABEL);
    assert_eq!(config.person_id, DEFAULT_PERSON_ID);
  }
}
