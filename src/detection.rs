// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detection.rs - 检测结果与置信度过滤
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

use tracing::{debug, warn};

/// 相对坐标边界框 `[ymin, xmin, ymax, xmax]`，取值 `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub ymin: f32,
  pub xmin: f32,
  pub ymax: f32,
  pub xmax: f32,
}

/// 像素坐标边界框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub xmin: i64,
  pub ymin: i64,
  pub xmax: i64,
  pub ymax: i64,
}

impl BoundingBox {
  pub fn from_slice(raw: &[f32]) -> Option<Self> {
    match raw {
      [ymin, xmin, ymax, xmax] => Some(Self {
        ymin: *ymin,
        xmin: *xmin,
        ymax: *ymax,
        xmax: *xmax,
      }),
      _ => None,
    }
  }

  /// 按显示分辨率反归一化，截断为整数
  pub fn denormalize(&self, width: u32, height: u32) -> PixelBox {
    let (w, h) = (width as f32, height as f32);
    PixelBox {
      xmin: (self.xmin * w) as i64,
      ymin: (self.ymin * h) as i64,
      xmax: (self.xmax * w) as i64,
      ymax: (self.ymax * h) as i64,
    }
  }
}

impl PixelBox {
  pub fn area(&self) -> i64 {
    (self.xmax - self.xmin) * (self.ymax - self.ymin)
  }
}

/// 单个检测目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bounding_box: BoundingBox,
  pub class_id: u32,
  pub score: f32,
}

impl Detection {
  pub fn pixel_area(&self, width: u32, height: u32) -> i64 {
    self.bounding_box.denormalize(width, height).area()
  }
}

/// 一次推理得到的四个并列输出
///
/// 只有前 `count` 项有效，`count` 不会超过 `N`。
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetectionSet {
  boxes: Vec<f32>,
  classes: Vec<f32>,
  scores: Vec<f32>,
  count: usize,
}

impl RawDetectionSet {
  /// 由展平后的输出构造
  ///
  /// `N` 取三个数组可容纳条目的最小值；模型报告的数量超过 `N` 时截断。
  pub fn new(boxes: Vec<f32>, classes: Vec<f32>, scores: Vec<f32>, count: f32) -> Self {
    let capacity = (boxes.len() / 4).min(classes.len()).min(scores.len());
    let reported = if count.is_finite() && count > 0.0 {
      count as usize
    } else {
      0
    };
    if reported > capacity {
      warn!("模型报告检测数 {} 超过输出容量 {}，已截断", reported, capacity);
    }

    Self {
      boxes,
      classes,
      scores,
      count: reported.min(capacity),
    }
  }

  pub fn count(&self) -> usize {
    self.count
  }

  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  /// 第 `index` 项原始条目
  pub fn entry(&self, index: usize) -> Option<Detection> {
    if index >= self.count {
      return None;
    }
    let bounding_box = BoundingBox::from_slice(&self.boxes[index * 4..index * 4 + 4])?;
    let class = self.classes[index];
    if !class.is_finite() || class < 0.0 || class.fract() != 0.0 || class > u32::MAX as f32 {
      warn!("第 {} 项类别值无效: {}，已丢弃", index, class);
      return None;
    }
    Some(Detection {
      bounding_box,
      class_id: class as u32,
      score: self.scores[index],
    })
  }

  pub fn iter(&self) -> impl Iterator<Item = Detection> + '_ {
    (0..self.count).filter_map(|index| self.entry(index))
  }
}

/// 按置信度阈值过滤，阈值包含在内，保持原始顺序
pub fn filter(raw: &RawDetectionSet, threshold: f32) -> Vec<Detection> {
  let detections: Vec<Detection> = raw.iter().filter(|d| d.score >= threshold).collect();
  debug!(
    "原始检测 {} 个，阈值 {:.2} 过滤后 {} 个",
    raw.count(),
    threshold,
    detections.len()
  );
  detections
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(scores: &[f32], count: f32) -> RawDetectionSet {
    let n = scores.len();
    let boxes = (0..n)
      .flat_map(|i| {
        let o = i as f32 * 0.01;
        [0.1 + o, 0.1 + o, 0.5 + o, 0.5 + o]
      })
      .collect();
    let classes = (0..n).map(|i| i as f32).collect();
    RawDetectionSet::new(boxes, classes, scores.to_vec(), count)
  }

  #[test]
  fn keeps_only_entries_above_threshold_in_order() {
    // count=3，只有 1 个达到 0.5
    let set = raw(&[0.3, 0.7, 0.49, 0.9], 3.0);
    let out = filter(&set, 0.5);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_id, 1);
    assert_eq!(out[0].score, 0.7);
  }

  #[test]
  fn malformed_class_values_are_dropped() {
    let boxes = [0.1, 0.1, 0.5, 0.5].repeat(4);
    let set = RawDetectionSet::new(boxes, vec![-1.0, f32::NAN, 0.5, 0.0], vec![0.9; 4], 4.0);
    assert_eq!(set.entry(0), None);
    assert_eq!(set.entry(1), None);
    assert_eq!(set.entry(2), None);

    let out = filter(&set, 0.5);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_id, 0);
    assert_eq!(out[0].bounding_box.ymin, 0.1);
  }

  #[test]
  fn threshold_is_inclusive() {
    let set = raw(&[0.5, 0.5], 2.0);
    assert_eq!(filter(&set, 0.5).len(), 2);
  }

  #[test]
  fn never_exceeds_count_and_preserves_order() {
    let set = raw(&[0.9, 0.2, 0.8, 0.95, 0.99], 4.0);
    let out = filter(&set, 0.5);
    assert!(out.len() <= set.count());
    let ids: Vec<u32> = out.iter().map(|d| d.class_id).collect();
    assert_eq!(ids, vec![0, 2, 3]);
    assert!(out.iter().all(|d| d.score >= 0.5));
  }

  #[test]
  fn filtering_is_idempotent() {
    let set = raw(&[0.6, 0.1, 0.7], 3.0);
    assert_eq!(filter(&set, 0.5), filter(&set, 0.5));
  }

  #[test]
  fn count_is_clamped_to_capacity() {
    let set = raw(&[0.9, 0.9], 10.0);
    assert_eq!(set.count(), 2);
    let set = raw(&[0.9, 0.9], -1.0);
    assert_eq!(set.count(), 0);
    let set = raw(&[0.9, 0.9], f32::NAN);
    assert!(set.is_empty());
  }

  #[test]
  fn denormalize_truncates_to_pixels() {
    let bbox = BoundingBox {
      ymin: 0.1,
      xmin: 0.1,
      ymax: 0.5,
      xmax: 0.5,
    };
    let pixel = bbox.denormalize(640, 480);
    assert_eq!(
      pixel,
      PixelBox {
        xmin: 64,
        ymin: 48,
        xmax: 320,
        ymax: 240,
      }
    );
    assert_eq!(pixel.area(), (320 - 64) * (240 - 48));
  }

  #[test]
  fn area_matches_truncated_product() {
    let bbox = BoundingBox {
      ymin: 0.123,
      xmin: 0.337,
      ymax: 0.871,
      xmax: 0.999,
    };
    let (w, h) = (640u32, 480u32);
    let xmin = (0.337f32 * w as f32) as i64;
    let xmax = (0.999f32 * w as f32) as i64;
    let ymin = (0.123f32 * h as f32) as i64;
    let ymax = (0.871f32 * h as f32) as i64;
    assert_eq!(bbox.denormalize(w, h).area(), (xmax - xmin) * (ymax - ymin));
  }
}
