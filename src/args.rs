// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use url::Url;

use crate::{
  config::{ConfigError, GpioSelection, PipelineConfig, parse_resolution},
  model::OutputNames,
  preprocess::ResizeFilter,
  reaction::{self, ReactionConfig},
};

/// 单摄像头入侵检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，rknn:// 或 onnx://，可带 ?width=&height= 指定输入尺寸
  #[arg(long, value_name = "MODEL", default_value = "rknn:///data/detect.rknn")]
  pub model: Url,

  /// 标签文件
  #[arg(long, value_name = "FILE", default_value = "data/coco_labels.txt")]
  pub labels: PathBuf,

  /// 输入来源，v4l:///dev/video0 或 image:///path/to/file.jpg
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,

  /// 检测置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.5)]
  pub threshold: f32,

  /// 四个输出张量名称：边界框,类别,置信度,数量
  #[arg(long, value_name = "NAMES")]
  pub output_names: Option<OutputNames>,

  /// 缩放滤波器: lanczos3, catmull-rom, gaussian, triangle
  #[arg(long, value_name = "FILTER", default_value = "lanczos3")]
  pub resize_filter: ResizeFilter,

  /// 入侵记录文件
  #[arg(long, value_name = "FILE", default_value = "intruderList.txt")]
  pub log_file: PathBuf,

  /// 输出引脚编号，none 表示不驱动引脚
  #[arg(long, value_name = "PIN", default_value = "4")]
  pub gpio: GpioSelection,

  /// 反归一化使用的显示分辨率
  #[arg(long, value_name = "WxH", default_value = "640x480", value_parser = parse_resolution)]
  pub display: (u32, u32),

  /// 行人的标签名
  #[arg(long, value_name = "LABEL", default_value = reaction::PERSON_LABEL)]
  pub person_label: String,

  /// 入侵判定的最低置信度
  #[arg(long, value_name = "SCORE", default_value_t = reaction::DEFAULT_MIN_SCORE)]
  pub min_score: f32,

  /// 入侵判定的最小像素面积
  #[arg(long, value_name = "AREA", default_value_t = reaction::DEFAULT_MIN_AREA)]
  pub min_area: i64,

  /// 标注帧输出，如 folder:///var/lib/sentry/frames
  #[arg(long, value_name = "OUTPUT")]
  pub annotate: Option<Url>,

  /// 处理的帧数，缺省时一直运行
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

impl Args {
  pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
    let config = PipelineConfig {
      model: self.model,
      labels: self.labels,
      input: self.input,
      threshold: self.threshold,
      output_names: self.output_names.unwrap_or_default(),
      resize_filter: self.resize_filter,
      log_file: self.log_file,
      gpio: self.gpio,
      person_label: self.person_label,
      reaction: ReactionConfig {
        min_score: self.min_score,
        min_area: self.min_area,
        display: self.display,
        ..ReactionConfig::default()
      },
      annotate: self.annotate,
      frame_number: self.frame_number,
    };
    config.validate()?;
    Ok(config)
  }
}
