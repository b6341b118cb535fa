// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/rknpu_backend.rs - RKNN 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::InputTensor,
  model::{Engine, InferenceError, ModelFile, ModelLoadError, input_size_override},
};

const RKNN_NUM_INPUTS: usize = 1;
/// SSD MobileNet 类检测模型的默认输入边长
const RKNN_DEFAULT_INPUT: u32 = 300;

pub struct RknnModel {
  context: Context,
  width: u32,
  height: u32,
  num_outputs: usize,
}

impl FromUrlWithScheme for RknnModel {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnModel {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let (width, height) =
      input_size_override(url)?.unwrap_or((RKNN_DEFAULT_INPUT, RKNN_DEFAULT_INPUT));
    let path = PathBuf::from(url.path());

    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(&path).map_err(|source| ModelLoadError::Read {
      path: path.clone(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())
      .map_err(|e| ModelLoadError::Invalid(e.to_string()))?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(ModelLoadError::Invalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| ModelLoadError::Invalid(format!("无法获取输入数量: {}", e)))?
      as usize;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| ModelLoadError::Invalid(format!("无法获取输出数量: {}", e)))?
      as usize;

    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(ModelLoadError::InputCount {
        expected: RKNN_NUM_INPUTS,
        actual: num_inputs,
      });
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    Ok(RknnModel {
      context,
      width,
      height,
      num_outputs,
    })
  }
}

impl ModelFile for RknnModel {
  type Engine = RknnEngine;

  fn input_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  // RKNN 上下文的接口不提供输出名称，按导出顺序解析
  fn output_names(&self) -> Option<Vec<String>> {
    None
  }

  fn output_count(&self) -> usize {
    self.num_outputs
  }

  fn allocate(self) -> Result<Self::Engine, ModelLoadError> {
    // RKNN 在创建上下文时已分配好张量内存
    Ok(RknnEngine {
      context: self.context,
      num_outputs: self.num_outputs,
    })
  }
}

pub struct RknnEngine {
  context: Context,
  num_outputs: usize,
}

fn engine_error(e: impl std::fmt::Display) -> InferenceError {
  InferenceError::Engine(e.to_string())
}

impl Engine for RknnEngine {
  fn name(&self) -> &'static str {
    "rknpu"
  }

  fn forward(&mut self, slot: usize, input: &InputTensor) -> Result<Vec<Vec<f32>>, InferenceError> {
    debug!("设置模型输入");
    self
      .context
      .set_input(
        slot as _,
        input.as_nhwc(),
        TensorFormat::NHWC,
        TensorType::UInt8,
      )
      .map_err(engine_error)?;

    debug!("执行模型推理");
    self.context.run().map_err(engine_error)?;

    debug!("获取模型输出");
    let output = self.context.get_outputs().map_err(engine_error)?;
    (0..self.num_outputs)
      .map(|index| {
        output
          .get_f32(index as _)
          .map(|data| data.to_vec())
          .map_err(engine_error)
      })
      .collect()
  }
}
