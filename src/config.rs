// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 运行配置
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

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::{model::OutputNames, preprocess::ResizeFilter, reaction::ReactionConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取标签文件 {path}: {source}")]
  LabelFile {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无效的配置值 {name}: {reason}")]
  InvalidValue { name: &'static str, reason: String },
}

/// 输出引脚选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioSelection {
  Pin(u32),
  Disabled,
}

impl std::str::FromStr for GpioSelection {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "none" | "off" => Ok(GpioSelection::Disabled),
      pin => pin
        .parse::<u32>()
        .map(GpioSelection::Pin)
        .map_err(|_| format!("无效的 GPIO 引脚: {}", pin)),
    }
  }
}

/// 解析 `640x480` 形式的分辨率
pub fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
  let (w, h) = s
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("分辨率格式应为 宽x高: {}", s))?;
  let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
  let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
  if w == 0 || h == 0 {
    return Err(format!("分辨率不能为 0: {}", s));
  }
  Ok((w, h))
}

/// 流水线运行配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub model: Url,
  pub labels: PathBuf,
  pub input: Url,
  pub threshold: f32,
  pub output_names: OutputNames,
  pub resize_filter: ResizeFilter,
  pub log_file: PathBuf,
  pub gpio: GpioSelection,
  pub person_label: String,
  pub reaction: ReactionConfig,
  pub annotate: Option<Url>,
  pub frame_number: Option<usize>,
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.threshold) {
      return Err(ConfigError::InvalidValue {
        name: "threshold",
        reason: format!("{} 不在 [0, 1] 内", self.threshold),
      });
    }
    if !(0.0..=1.0).contains(&self.reaction.min_score) {
      return Err(ConfigError::InvalidValue {
        name: "min_score",
        reason: format!("{} 不在 [0, 1] 内", self.reaction.min_score),
      });
    }
    if self.reaction.min_area < 0 {
      return Err(ConfigError::InvalidValue {
        name: "min_area",
        reason: format!("{} 不能为负", self.reaction.min_area),
      });
    }
    Ok(())
  }
}
