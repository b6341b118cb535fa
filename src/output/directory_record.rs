// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::cell::Cell;
use std::path::PathBuf;

use chrono::{Datelike, Local};
use image::RgbImage;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::Detection,
  output::{OutputError, Render, draw::draw_detections},
};

/// 把标注后的帧按日期存入目录
///
/// `folder:///var/lib/sentry/frames`，默认只保存有检测结果的帧，
/// 带 `?always` 时每帧都保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: Cell<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = OutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(uri.scheme().to_string()));
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput::new(uri.path(), always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: Cell::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    let id = self.frame_counter.get().wrapping_add(1);
    self.frame_counter.set(id);
    id
  }

  fn frame_path(&self) -> Result<PathBuf, OutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<RgbImage, [Detection]> for DirectoryRecordOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &[Detection]) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let mut image = frame.clone();
    draw_detections(&mut image, result);
    let path = self.frame_path()?;
    image.save(&path)?;
    debug!("保存标注帧: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::BoundingBox;

  fn count_png(dir: &std::path::Path) -> usize {
    let mut count = 0;
    for entry in std::fs::read_dir(dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        count += count_png(&path);
      } else if path.extension().is_some_and(|e| e == "png") {
        count += 1;
      }
    }
    count
  }

  #[test]
  fn saves_only_frames_with_detections() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), false);
    let frame = RgbImage::new(64, 48);
    let detection = Detection {
      bounding_box: BoundingBox {
        ymin: 0.1,
        xmin: 0.1,
        ymax: 0.9,
        xmax: 0.9,
      },
      class_id: 0,
      score: 0.9,
    };

    output.render_result(&frame, &[]).unwrap();
    output.render_result(&frame, &[detection]).unwrap();
    assert_eq!(count_png(dir.path()), 1);
  }

  #[test]
  fn always_saves_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = RgbImage::new(16, 16);
    output.render_result(&frame, &[]).unwrap();
    output.render_result(&frame, &[]).unwrap();
    assert_eq!(count_png(dir.path()), 2);
  }
}
