// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/sentry_oneshot.rs - 单张图片推理测试
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

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_sentry::{
  FromUrl,
  detection,
  frame::FrameBuffer,
  input::{FrameSource, ImageFileInput},
  label::LabelTable,
  model::{LoadedModel, ModelWrapper, OutputNames},
  output::open_annotator,
  preprocess::{FramePreprocessor, ResizeFilter},
};

/// 对单张图片推理并打印检测结果，不写记录也不驱动引脚
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 标签文件
  #[arg(long, value_name = "FILE", default_value = "data/coco_labels.txt")]
  pub labels: PathBuf,
  /// 输入图片，image:///path/to/file.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 置信度阈值
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.5)]
  pub threshold: f32,
  #[arg(long, value_name = "NAMES")]
  pub output_names: Option<OutputNames>,
  #[arg(long, value_name = "FILTER", default_value = "lanczos3")]
  pub resize_filter: ResizeFilter,
  /// 标注输出
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let labels = LabelTable::load(&args.labels)?;
  let mut input = ImageFileInput::from_url(&args.input)?;
  let mut session =
    LoadedModel::<ModelWrapper>::load(&args.model, &args.output_names.unwrap_or_default())?
      .allocate()?;
  let output = open_annotator(args.output.as_ref())?;
  let preprocessor = FramePreprocessor::new(args.resize_filter);

  let (width, height) = input.resolution();
  let mut buffer = FrameBuffer::with_capacity(width as usize * height as usize * 3);
  if !input.capture_into(&mut buffer)? {
    bail!("输入图片为空");
  }

  let image = preprocessor.decode(&buffer.as_raw())?;
  let (input_width, input_height) = session.input_size();
  let tensor = preprocessor.resize(&image, input_width, input_height);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let raw = session.invoke(&tensor)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  let detections = detection::filter(&raw, args.threshold);
  info!("{} 个原始结果中 {} 个超过阈值", raw.count(), detections.len());
  for d in &detections {
    let pixel = d.bounding_box.denormalize(width, height);
    println!(
      "{}: {:.2}% at ({}, {}) - ({}, {})",
      labels.display(d.class_id),
      d.score * 100.0,
      pixel.xmin,
      pixel.ymin,
      pixel.xmax,
      pixel.ymax
    );
  }

  if let Some(output) = output {
    output.render_result(&image, &detections)?;
  }

  Ok(())
}
