// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tract_backend.rs - ONNX (tract) 推理后端
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

use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputTensor, RGB_CHANNELS},
  model::{Engine, InferenceError, ModelFile, ModelLoadError, input_size_override},
};

fn invalid(what: &str, e: impl std::fmt::Display) -> ModelLoadError {
  ModelLoadError::Invalid(format!("{}: {}", what, e))
}

/// 已优化但尚未生成执行计划的 ONNX 模型
pub struct TractModel {
  model: TypedModel,
  width: u32,
  height: u32,
  output_names: Vec<String>,
}

impl FromUrlWithScheme for TractModel {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractModel {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let path = PathBuf::from(url.path());
    if !path.is_file() {
      return Err(ModelLoadError::Read {
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "模型文件不存在"),
        path,
      });
    }

    info!("加载 ONNX 模型: {}", path.display());
    let mut model = tract_onnx::onnx()
      .model_for_path(&path)
      .map_err(|e| invalid("无法解析 ONNX 模型", e))?;

    if let Some((width, height)) = input_size_override(url)? {
      model = model
        .with_input_fact(
          0,
          InferenceFact::dt_shape(
            u8::datum_type(),
            tvec!(1, height as usize, width as usize, RGB_CHANNELS),
          ),
        )
        .map_err(|e| invalid("无法设置输入形状", e))?;
    }

    let input_count = model
      .input_outlets()
      .map_err(|e| invalid("无法获取输入", e))?
      .len();
    if input_count != 1 {
      return Err(ModelLoadError::InputCount {
        expected: 1,
        actual: input_count,
      });
    }

    let output_names = model
      .output_outlets()
      .map_err(|e| invalid("无法获取输出", e))?
      .iter()
      .map(|outlet| {
        model
          .outlet_label(*outlet)
          .map(str::to_string)
          .unwrap_or_else(|| model.node(outlet.node).name.clone())
      })
      .collect::<Vec<_>>();
    debug!("ONNX 输出: {:?}", output_names);

    let model = model
      .into_optimized()
      .map_err(|e| invalid("无法优化 ONNX 模型", e))?;

    let shape = model
      .input_fact(0)
      .map_err(|e| invalid("无法获取输入形状", e))?
      .shape
      .as_concrete()
      .map(|s| s.to_vec())
      .unwrap_or_default();

    let (width, height) = match shape.as_slice() {
      [1, h, w, c] if *c == RGB_CHANNELS => (*w as u32, *h as u32),
      _ => return Err(ModelLoadError::InputShape(shape)),
    };

    Ok(TractModel {
      model,
      width,
      height,
      output_names,
    })
  }
}

impl ModelFile for TractModel {
  type Engine = TractEngine;

  fn input_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn output_names(&self) -> Option<Vec<String>> {
    Some(self.output_names.clone())
  }

  fn output_count(&self) -> usize {
    self.output_names.len()
  }

  fn allocate(self) -> Result<Self::Engine, ModelLoadError> {
    let plan = self
      .model
      .into_runnable()
      .map_err(|e| invalid("无法生成执行计划", e))?;
    Ok(TractEngine { plan })
  }
}

pub struct TractEngine {
  plan: TypedRunnableModel<TypedModel>,
}

fn engine_error(e: impl std::fmt::Display) -> InferenceError {
  InferenceError::Engine(e.to_string())
}

fn flatten(value: &TValue) -> TractResult<Vec<f32>> {
  let tensor = value.cast_to::<f32>()?;
  Ok(tensor.as_slice::<f32>()?.to_vec())
}

impl Engine for TractEngine {
  fn name(&self) -> &'static str {
    "tract"
  }

  fn forward(&mut self, _slot: usize, input: &InputTensor) -> Result<Vec<Vec<f32>>, InferenceError> {
    let [n, h, w, c] = input.shape();
    let array = tract_ndarray::Array4::from_shape_vec((n, h, w, c), input.as_nhwc().to_vec())
      .map_err(engine_error)?;

    let outputs = self
      .plan
      .run(tvec!(array.into_tensor().into()))
      .map_err(engine_error)?;

    outputs
      .iter()
      .map(|value| flatten(value).map_err(engine_error))
      .collect()
  }
}
