// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 连续检测任务
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

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  detection::{self, Detection},
  error::PipelineError,
  frame::FrameBuffer,
  input::FrameSource,
  label::LabelTable,
  model::{Engine, InferenceSession},
  output::Annotator,
  preprocess::FramePreprocessor,
  reaction::{Reaction, ReactionPolicy, ReleaseHandle, SignalLine},
};

/// 强制退出前等待循环自行结束的时间
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 进程级设备上下文
///
/// 持有摄像头、输出引脚与标签表，显式传入循环；离开作用域时
/// （包括错误提前返回）拉低引脚并释放摄像头。
pub struct DeviceContext<S: FrameSource, G: SignalLine> {
  labels: LabelTable,
  source: S,
  signal: G,
}

impl<S: FrameSource, G: SignalLine> DeviceContext<S, G> {
  pub fn new(labels: LabelTable, source: S, signal: G) -> Self {
    Self {
      labels,
      source,
      signal,
    }
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }
}

impl<S: FrameSource, G: SignalLine> Drop for DeviceContext<S, G> {
  fn drop(&mut self) {
    info!("释放设备资源");
    if let Err(e) = self.signal.set(false) {
      warn!("复位输出引脚失败: {}", e);
    }
  }
}

/// 循环所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Idle,
  Capturing,
  Preprocessing,
  Inferring,
  Filtering,
  Reacting,
  Annotating,
  Stopped,
  Aborted,
}

/// 正常结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
  /// 输入源耗尽
  Exhausted,
  /// 达到指定帧数
  FrameLimit,
  /// 收到中断信号
  Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
  /// 采集到的帧数
  pub captured: usize,
  /// 完整处理的帧数
  pub processed: usize,
  /// 解码失败被跳过的帧数
  pub skipped: usize,
  /// 判定为入侵的帧数
  pub intruder_frames: usize,
  /// 追加的入侵记录数
  pub records: usize,
  pub exit: ExitReason,
}

/// 注册 SIGINT / SIGTERM 处理，返回中断通知
///
/// 循环在 `FORCE_EXIT_AFTER` 内未退出时强制结束进程。`process::exit`
/// 不执行 `DeviceContext` 的 `Drop`，结束前先通过 `release` 拉低引脚。
pub fn install_interrupt_handler(
  release: Option<ReleaseHandle>,
) -> Result<Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    let release = release.clone();
    thread::spawn(move || {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      force_release(release.as_ref());
      std::process::exit(1);
    });
  })?;

  Ok(rx)
}

fn force_release(release: Option<&ReleaseHandle>) {
  if let Some(handle) = release
    && let Err(e) = handle.release()
  {
    error!("强制退出前复位输出引脚失败: {}", e);
  }
}

/// 采集 → 预处理 → 推理 → 过滤 → 响应 → 标注 的单线程循环
pub struct PipelineLoop<E> {
  session: InferenceSession<E>,
  preprocessor: FramePreprocessor,
  policy: ReactionPolicy,
  threshold: f32,
  annotator: Option<Annotator>,
  frame_number: Option<usize>,
  interrupt: Option<Receiver<()>>,
  state: LoopState,
}

impl<E: Engine> PipelineLoop<E> {
  pub fn new(
    session: InferenceSession<E>,
    preprocessor: FramePreprocessor,
    policy: ReactionPolicy,
    threshold: f32,
  ) -> Self {
    Self {
      session,
      preprocessor,
      policy,
      threshold,
      annotator: None,
      frame_number: None,
      interrupt: None,
      state: LoopState::Idle,
    }
  }

  pub fn with_annotator(mut self, annotator: Option<Annotator>) -> Self {
    self.annotator = annotator;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  pub fn state(&self) -> LoopState {
    self.state
  }

  fn enter(&mut self, state: LoopState) {
    debug!("{:?} -> {:?}", self.state, state);
    self.state = state;
  }

  fn abort(&mut self, error: impl Into<PipelineError>) -> PipelineError {
    let error = error.into();
    self.enter(LoopState::Aborted);
    error!("任务中止: {}", error);
    error
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .is_some_and(|rx| rx.try_recv().is_ok())
  }

  pub fn run<S: FrameSource, G: SignalLine>(
    &mut self,
    context: &mut DeviceContext<S, G>,
  ) -> Result<LoopSummary, PipelineError> {
    info!("开始任务...");
    let (input_width, input_height) = self.session.input_size();
    let (source_width, source_height) = context.source.resolution();
    info!(
      "输入源 {}x{} -> 模型输入 {}x{} ({:?}), 阈值 {:.2}",
      source_width,
      source_height,
      input_width,
      input_height,
      self.preprocessor.filter(),
      self.threshold
    );

    let mut buffer = FrameBuffer::with_capacity(source_width as usize * source_height as usize * 3);
    let mut summary = LoopSummary {
      captured: 0,
      processed: 0,
      skipped: 0,
      intruder_frames: 0,
      records: 0,
      exit: ExitReason::Exhausted,
    };

    let exit = loop {
      if self.interrupted() {
        warn!("中断信号接收，退出任务循环");
        break ExitReason::Interrupted;
      }
      if self.frame_number.is_some_and(|n| summary.captured >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.captured);
        break ExitReason::FrameLimit;
      }

      self.enter(LoopState::Capturing);
      match context.source.capture_into(&mut buffer) {
        Ok(true) => {}
        Ok(false) => {
          info!("输入源已耗尽");
          break ExitReason::Exhausted;
        }
        Err(e) => return Err(self.abort(e)),
      }
      summary.captured += 1;
      let frame_index = summary.captured;
      let started = Instant::now();

      self.enter(LoopState::Preprocessing);
      let decoded = self.preprocessor.decode(&buffer.as_raw());
      buffer.reset();
      let image = match decoded {
        Ok(image) => image,
        Err(e) => {
          warn!("第 {} 帧解码失败，跳过: {}", frame_index, e);
          summary.skipped += 1;
          continue;
        }
      };
      let tensor = self.preprocessor.resize(&image, input_width, input_height);

      self.enter(LoopState::Inferring);
      let inference_started = Instant::now();
      let raw = match self.session.invoke(&tensor) {
        Ok(raw) => raw,
        Err(e) => return Err(self.abort(e)),
      };
      let inference_elapsed = inference_started.elapsed();

      self.enter(LoopState::Filtering);
      let detections = detection::filter(&raw, self.threshold);

      self.enter(LoopState::Reacting);
      let reaction = self.policy.react(&detections, &mut context.signal);
      self.record(&mut summary, &reaction, &detections, context.labels());

      if let Some(annotator) = self.annotator.take() {
        self.enter(LoopState::Annotating);
        if let Err(e) = annotator.render_result(&image, &detections) {
          warn!("第 {} 帧标注失败: {}", frame_index, e);
        }
        self.annotator = Some(annotator);
      }

      summary.processed += 1;
      info!(
        "第 {} 帧处理完成，推理耗时: {:.2?} / 总耗时: {:.2?}",
        frame_index,
        inference_elapsed,
        started.elapsed()
      );
    };

    self.enter(LoopState::Stopped);
    summary.exit = exit;
    info!("任务完成，退出: {:?}", summary);
    Ok(summary)
  }

  fn record(
    &self,
    summary: &mut LoopSummary,
    reaction: &Reaction,
    detections: &[Detection],
    labels: &LabelTable,
  ) {
    for detection in detections {
      debug!(
        "  - {}: {:.2}%",
        labels.display(detection.class_id),
        detection.score * 100.0
      );
    }
    if reaction.intruders > 0 {
      summary.intruder_frames += 1;
    }
    summary.records += reaction.intruders - reaction.log_failures;
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, io::Cursor, rc::Rc};

  use image::{ImageFormat, RgbImage};

  use super::*;
  use crate::{
    detection::Detection,
    frame::{FrameEncoding, InputTensor},
    input::InputError,
    model::{InferenceError, OutputLayout},
    output::{OutputError, Render},
    reaction::{IntruderLog, ReactionConfig, SignalError},
  };

  const LAYOUT: OutputLayout = OutputLayout {
    boxes: 0,
    classes: 1,
    scores: 2,
    count: 3,
  };

  fn png_frame() -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(8, 6, image::Rgb([90, 120, 200]))
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  struct ScriptedSource {
    frames: Vec<Vec<u8>>,
    next: usize,
    cycle: bool,
  }

  impl ScriptedSource {
    fn once(frames: Vec<Vec<u8>>) -> Self {
      Self {
        frames,
        next: 0,
        cycle: false,
      }
    }

    fn endless() -> Self {
      Self {
        frames: vec![png_frame()],
        next: 0,
        cycle: true,
      }
    }
  }

  impl FrameSource for ScriptedSource {
    fn resolution(&self) -> (u32, u32) {
      (8, 6)
    }

    fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<bool, InputError> {
      if self.next >= self.frames.len() {
        if !self.cycle || self.frames.is_empty() {
          return Ok(false);
        }
        self.next = 0;
      }
      buffer.fill(&self.frames[self.next], 8, 6, FrameEncoding::Compressed);
      self.next += 1;
      Ok(true)
    }
  }

  struct ScriptedEngine {
    outputs: Vec<Vec<f32>>,
    calls: Rc<RefCell<usize>>,
  }

  impl Engine for ScriptedEngine {
    fn name(&self) -> &'static str {
      "scripted"
    }

    fn forward(
      &mut self,
      _slot: usize,
      input: &InputTensor,
    ) -> Result<Vec<Vec<f32>>, InferenceError> {
      assert_eq!(input.shape(), [1, 4, 4, 3]);
      *self.calls.borrow_mut() += 1;
      Ok(self.outputs.clone())
    }
  }

  #[derive(Clone, Default)]
  struct SharedSignal(Rc<RefCell<Vec<bool>>>);

  impl SignalLine for SharedSignal {
    fn set(&mut self, level: bool) -> Result<(), SignalError> {
      self.0.borrow_mut().push(level);
      Ok(())
    }
  }

  struct FailingAnnotator;

  impl Render<RgbImage, [Detection]> for FailingAnnotator {
    type Error = OutputError;

    fn render_result(&self, _frame: &RgbImage, _result: &[Detection]) -> Result<(), OutputError> {
      Err(OutputError::Disabled)
    }
  }

  fn one_detection(class_id: f32, score: f32) -> Vec<Vec<f32>> {
    vec![
      vec![0.1, 0.1, 0.5, 0.5],
      vec![class_id],
      vec![score],
      vec![1.0],
    ]
  }

  fn pipeline(
    outputs: Vec<Vec<f32>>,
    log: std::path::PathBuf,
  ) -> (PipelineLoop<ScriptedEngine>, Rc<RefCell<usize>>) {
    let calls = Rc::new(RefCell::new(0));
    let engine = ScriptedEngine {
      outputs,
      calls: calls.clone(),
    };
    let pipeline = PipelineLoop::new(
      InferenceSession::from_engine(engine, LAYOUT, 4, 4),
      FramePreprocessor::default(),
      ReactionPolicy::new(ReactionConfig::default(), IntruderLog::new(log)),
      0.5,
    );
    (pipeline, calls)
  }

  fn context(
    source: ScriptedSource,
    signal: &SharedSignal,
  ) -> DeviceContext<ScriptedSource, SharedSignal> {
    DeviceContext::new(LabelTable::parse("person\nbicycle\ncar"), source, signal.clone())
  }

  #[test]
  fn intruder_frame_logs_and_raises_signal() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("intruderList.txt");
    let (mut pipeline, _) = pipeline(one_detection(0.0, 0.8), log.clone());
    let signal = SharedSignal::default();

    let mut context = context(ScriptedSource::once(vec![png_frame()]), &signal);
    let summary = pipeline.run(&mut context).unwrap();

    assert_eq!(summary.exit, ExitReason::Exhausted);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.intruder_frames, 1);
    assert_eq!(summary.records, 1);
    assert_eq!(pipeline.state(), LoopState::Stopped);
    assert_eq!(*signal.0.borrow(), vec![true]);

    let content = std::fs::read_to_string(&log).unwrap();
    let line = content.lines().next().unwrap();
    let (flag, timestamp) = line.split_once(' ').unwrap();
    assert_eq!(flag, "1");
    assert!(chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f").is_ok());

    drop(context);
    assert_eq!(*signal.0.borrow(), vec![true, false]);
  }

  #[test]
  fn weak_or_other_detections_keep_signal_low() {
    for outputs in [one_detection(0.0, 0.55), one_detection(2.0, 0.95)] {
      let dir = tempfile::tempdir().unwrap();
      let log = dir.path().join("intruderList.txt");
      let (mut pipeline, calls) = pipeline(outputs, log.clone());
      let signal = SharedSignal::default();

      let mut context = context(ScriptedSource::once(vec![png_frame()]), &signal);
      let summary = pipeline.run(&mut context).unwrap();

      assert_eq!(*calls.borrow(), 1);
      assert_eq!(summary.intruder_frames, 0);
      assert_eq!(*signal.0.borrow(), vec![false]);
      assert!(!log.exists());
    }
  }

  #[test]
  fn undecodable_frame_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, calls) = pipeline(one_detection(0.0, 0.8), dir.path().join("log.txt"));
    let signal = SharedSignal::default();

    let source = ScriptedSource::once(vec![b"not an image".to_vec(), png_frame()]);
    let mut context = context(source, &signal);
    let summary = pipeline.run(&mut context).unwrap();

    assert_eq!(summary.captured, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(*signal.0.borrow(), vec![true]);
  }

  #[test]
  fn frame_limit_stops_endless_source() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, calls) = pipeline(one_detection(0.0, 0.8), dir.path().join("log.txt"));
    let mut pipeline = pipeline.with_frame_number(Some(3));
    let signal = SharedSignal::default();

    let mut context = context(ScriptedSource::endless(), &signal);
    let summary = pipeline.run(&mut context).unwrap();

    assert_eq!(summary.exit, ExitReason::FrameLimit);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.records, 3);
    assert_eq!(*calls.borrow(), 3);
    assert_eq!(*signal.0.borrow(), vec![true, true, true]);
  }

  #[test]
  fn pending_interrupt_stops_before_capture() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let (pipeline, calls) = pipeline(one_detection(0.0, 0.8), dir.path().join("log.txt"));
    let mut pipeline = pipeline.with_interrupt(rx);
    let signal = SharedSignal::default();

    let mut context = context(ScriptedSource::endless(), &signal);
    let summary = pipeline.run(&mut context).unwrap();

    assert_eq!(summary.exit, ExitReason::Interrupted);
    assert_eq!(summary.captured, 0);
    assert_eq!(*calls.borrow(), 0);
  }

  #[test]
  fn unwritable_log_does_not_stop_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("missing").join("intruderList.txt");
    let (mut pipeline, _) = pipeline(one_detection(0.0, 0.8), log);
    let signal = SharedSignal::default();

    let source = ScriptedSource::once(vec![png_frame(), png_frame()]);
    let mut context = context(source, &signal);
    let summary = pipeline.run(&mut context).unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.intruder_frames, 2);
    assert_eq!(summary.records, 0);
    assert_eq!(*signal.0.borrow(), vec![true, true]);
  }

  #[test]
  fn annotation_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(one_detection(0.0, 0.8), dir.path().join("log.txt"));
    let mut pipeline = pipeline.with_annotator(Some(Box::new(FailingAnnotator)));
    let signal = SharedSignal::default();

    let mut context = context(ScriptedSource::once(vec![png_frame()]), &signal);
    let summary = pipeline.run(&mut context).unwrap();
    assert_eq!(summary.processed, 1);
  }

  struct StalledCamera;

  impl FrameSource for StalledCamera {
    fn resolution(&self) -> (u32, u32) {
      (8, 6)
    }

    fn capture_into(&mut self, _buffer: &mut FrameBuffer) -> Result<bool, InputError> {
      Err(InputError::V4lError("VIDIOC_DQBUF: 超时".to_string()))
    }
  }

  #[test]
  fn capture_failure_aborts_and_releases_signal() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, calls) = pipeline(one_detection(0.0, 0.8), dir.path().join("log.txt"));
    let signal = SharedSignal::default();

    let mut context = DeviceContext::new(LabelTable::parse("person"), StalledCamera, signal.clone());
    let error = pipeline.run(&mut context).unwrap_err();

    assert!(matches!(error, PipelineError::Input(InputError::V4lError(_))));
    assert_eq!(pipeline.state(), LoopState::Aborted);
    assert_eq!(*calls.borrow(), 0);

    drop(context);
    assert_eq!(*signal.0.borrow(), vec![false]);
  }

  #[test]
  fn forced_exit_lowers_the_pin() {
    let root = tempfile::tempdir().unwrap();
    let pin_dir = root.path().join("gpio4");
    std::fs::create_dir(&pin_dir).unwrap();
    let mut gpio = crate::reaction::SysfsGpio::open_at(root.path(), 4).unwrap();
    gpio.set(true).unwrap();

    force_release(gpio.release_handle().as_ref());
    assert_eq!(std::fs::read_to_string(pin_dir.join("value")).unwrap(), "0");

    force_release(None);
  }

  #[test]
  fn engine_failure_aborts_and_releases_signal() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, _) = pipeline(vec![vec![0.0]], dir.path().join("log.txt"));
    let signal = SharedSignal::default();

    let mut context = context(ScriptedSource::once(vec![png_frame()]), &signal);
    let error = pipeline.run(&mut context).unwrap_err();

    assert!(matches!(
      error,
      PipelineError::Inference(InferenceError::MissingOutput(_))
    ));
    assert_eq!(pipeline.state(), LoopState::Aborted);

    drop(context);
    assert_eq!(*signal.0.borrow(), vec![false]);
  }
}
