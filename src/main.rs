// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 入侵检测主程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shanan_sentry::{
  FromUrl,
  args::Args,
  config::GpioSelection,
  input::InputWrapper,
  label::LabelTable,
  model::{LoadedModel, ModelWrapper},
  output::open_annotator,
  preprocess::FramePreprocessor,
  reaction::{IntruderLog, NullSignal, ReactionPolicy, SignalLine, SysfsGpio},
  task::{DeviceContext, PipelineLoop, install_interrupt_handler},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let config = Args::parse().into_config()?;

  info!("模型文件路径: {}", config.model);
  info!("标签文件: {}", config.labels.display());
  info!("输入来源: {}", config.input);
  info!("入侵记录: {}", config.log_file.display());

  let labels = LabelTable::load(&config.labels)?;
  info!("加载 {} 个标签", labels.len());
  let reaction = config
    .reaction
    .with_person_label(&labels, &config.person_label);
  info!(
    "入侵判定: 类别 {} ({}), 置信度 ≥ {:.2}, 面积 ≥ {}",
    reaction.person_id,
    labels.display(reaction.person_id),
    reaction.min_score,
    reaction.min_area
  );

  let session =
    LoadedModel::<ModelWrapper>::load(&config.model, &config.output_names)?.allocate()?;
  let source = InputWrapper::from_url(&config.input)?;
  let signal: Box<dyn SignalLine> = match config.gpio {
    GpioSelection::Pin(pin) => Box::new(SysfsGpio::open(pin)?),
    GpioSelection::Disabled => {
      info!("未配置输出引脚");
      Box::new(NullSignal)
    }
  };
  let annotator = open_annotator(config.annotate.as_ref())?;
  let interrupt = install_interrupt_handler(signal.release_handle())?;

  let mut context = DeviceContext::new(labels, source, signal);
  let summary = PipelineLoop::new(
    session,
    FramePreprocessor::new(config.resize_filter),
    ReactionPolicy::new(reaction, IntruderLog::new(&config.log_file)),
    config.threshold,
  )
  .with_annotator(annotator)
  .with_frame_number(config.frame_number)
  .with_interrupt(interrupt)
  .run(&mut context)?;

  info!(
    "共处理 {} 帧（跳过 {} 帧），入侵 {} 帧，写入 {} 条记录",
    summary.processed, summary.skipped, summary.intruder_frames, summary.records
  );

  Ok(())
}
