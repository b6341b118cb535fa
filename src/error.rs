// 该文件是 Shanan （山南西风） 项目的一部分。
// src/error.rs - 流水线错误分类
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

use thiserror::Error;

use crate::{
  config::ConfigError,
  input::InputError,
  model::{InferenceError, ModelLoadError},
};

/// 流水线顶层错误
///
/// 只有致命错误会以此类型离开循环；解码失败、日志写入失败、
/// GPIO 写入失败在循环内部处理，不会中止监控。
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
  #[error("输入源错误: {0}")]
  Input(#[from] InputError),
}
