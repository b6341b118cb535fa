// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 推理会话
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

use std::{path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, detection::RawDetectionSet, frame::InputTensor};

#[cfg(not(any(feature = "model_rknpu", feature = "model_tract")))]
compile_error!("至少需要启用一个模型后端: model_rknpu 或 model_tract");

#[cfg(feature = "model_rknpu")]
mod rknpu_backend;
#[cfg(feature = "model_rknpu")]
pub use self::rknpu_backend::{RknnEngine, RknnModel};

#[cfg(feature = "model_tract")]
mod tract_backend;
#[cfg(feature = "model_tract")]
pub use self::tract_backend::{TractEngine, TractModel};

/// 检测模型固定的输出数量
pub const DETECTION_OUTPUTS: usize = 4;

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("无法读取模型文件 {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("模型无效: {0}")]
  Invalid(String),
  #[error("预期模型输入数量为 {expected}, 实际为 {actual}")]
  InputCount { expected: usize, actual: usize },
  #[error("预期模型输出数量为 {expected}, 实际为 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("模型缺少输出: {0}")]
  MissingOutput(String),
  #[error("模型输入形状不受支持: {0:?}")]
  InputShape(Vec<usize>),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入张量尺寸 {actual:?} 与模型输入 {expected:?} 不符")]
  InputShape {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("推理后端错误: {0}")]
  Engine(String),
  #[error("推理结果缺少第 {0} 个输出")]
  MissingOutput(usize),
}

/// 四个检测输出的名称：边界框、类别、置信度、数量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
  pub boxes: String,
  pub classes: String,
  pub scores: String,
  pub count: String,
}

impl Default for OutputNames {
  fn default() -> Self {
    Self {
      boxes: "TFLite_Detection_PostProcess".to_string(),
      classes: "TFLite_Detection_PostProcess:1".to_string(),
      scores: "TFLite_Detection_PostProcess:2".to_string(),
      count: "TFLite_Detection_PostProcess:3".to_string(),
    }
  }
}

impl FromStr for OutputNames {
  type Err = String;

  /// `boxes,classes,scores,count`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    match parts.as_slice() {
      [boxes, classes, scores, count] if parts.iter().all(|p| !p.is_empty()) => Ok(Self {
        boxes: boxes.to_string(),
        classes: classes.to_string(),
        scores: scores.to_string(),
        count: count.to_string(),
      }),
      _ => Err(format!("输出名称需为 4 个逗号分隔的名称: {}", s)),
    }
  }
}

/// 四个检测输出在模型输出表中的位置，加载时解析一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
  pub boxes: usize,
  pub classes: usize,
  pub scores: usize,
  pub count: usize,
}

impl OutputLayout {
  /// 按名称查找输出位置
  pub fn resolve(names: &[String], wanted: &OutputNames) -> Result<Self, ModelLoadError> {
    let find = |name: &str| {
      names
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| ModelLoadError::MissingOutput(name.to_string()))
    };

    Ok(Self {
      boxes: find(&wanted.boxes)?,
      classes: find(&wanted.classes)?,
      scores: find(&wanted.scores)?,
      count: find(&wanted.count)?,
    })
  }

  /// 运行时不提供输出名称时按导出顺序排列
  pub fn positional(output_count: usize) -> Result<Self, ModelLoadError> {
    if output_count != DETECTION_OUTPUTS {
      return Err(ModelLoadError::OutputCount {
        expected: DETECTION_OUTPUTS,
        actual: output_count,
      });
    }
    Ok(Self {
      boxes: 0,
      classes: 1,
      scores: 2,
      count: 3,
    })
  }
}

/// 已加载但尚未分配的模型
pub trait ModelFile: Sized {
  type Engine: Engine;

  /// 模型输入的 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  /// 图像输入槽位
  fn input_slot(&self) -> usize {
    0
  }

  /// 输出张量名称，运行时不提供名称时返回 `None`
  fn output_names(&self) -> Option<Vec<String>>;

  fn output_count(&self) -> usize;

  /// 分配张量缓冲，得到可执行的推理引擎
  fn allocate(self) -> Result<Self::Engine, ModelLoadError>;
}

/// 可执行的推理引擎
pub trait Engine {
  fn name(&self) -> &'static str;

  /// 写入输入、同步执行一次前向，返回按模型顺序展平后的全部输出
  fn forward(&mut self, slot: usize, input: &InputTensor) -> Result<Vec<Vec<f32>>, InferenceError>;
}

/// 加载后的模型，输出布局已解析
pub struct LoadedModel<M> {
  model: M,
  layout: OutputLayout,
}

impl<M: ModelFile> LoadedModel<M> {
  pub fn new(model: M, names: &OutputNames) -> Result<Self, ModelLoadError> {
    let layout = match model.output_names() {
      Some(found) => {
        debug!("模型输出名称: {:?}", found);
        OutputLayout::resolve(&found, names)?
      }
      None => {
        debug!("推理后端不提供输出名称，按导出顺序解析");
        OutputLayout::positional(model.output_count())?
      }
    };
    info!("输出布局: {:?}", layout);
    Ok(Self { model, layout })
  }

  /// 分配张量，之后才能推理
  pub fn allocate(self) -> Result<InferenceSession<M::Engine>, ModelLoadError> {
    let (width, height) = self.model.input_size();
    let input_slot = self.model.input_slot();
    let engine = self.model.allocate()?;
    info!(
      "推理会话就绪: 后端 {}, 输入 {}x{}, 槽位 {}",
      engine.name(),
      width,
      height,
      input_slot
    );
    Ok(InferenceSession {
      engine,
      layout: self.layout,
      input_slot,
      width,
      height,
    })
  }
}

impl<M: ModelFile + FromUrl<Error = ModelLoadError>> LoadedModel<M> {
  pub fn load(url: &Url, names: &OutputNames) -> Result<Self, ModelLoadError> {
    Self::new(M::from_url(url)?, names)
  }
}

/// 推理会话：单一同步调用，图像进，原始检测张量出
pub struct InferenceSession<E> {
  engine: E,
  layout: OutputLayout,
  input_slot: usize,
  width: u32,
  height: u32,
}

impl<E: Engine> InferenceSession<E> {
  /// 由已分配的引擎直接构造
  pub fn from_engine(engine: E, layout: OutputLayout, width: u32, height: u32) -> Self {
    Self {
      engine,
      layout,
      input_slot: 0,
      width,
      height,
    }
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn invoke(&mut self, tensor: &InputTensor) -> Result<RawDetectionSet, InferenceError> {
    if (tensor.width(), tensor.height()) != (self.width, self.height) {
      return Err(InferenceError::InputShape {
        expected: (self.width, self.height),
        actual: (tensor.width(), tensor.height()),
      });
    }

    let mut outputs = self.engine.forward(self.input_slot, tensor)?;
    let mut take = |index: usize| {
      outputs
        .get_mut(index)
        .map(std::mem::take)
        .ok_or(InferenceError::MissingOutput(index))
    };

    let boxes = take(self.layout.boxes)?;
    let classes = take(self.layout.classes)?;
    let scores = take(self.layout.scores)?;
    let count = take(self.layout.count)?.first().copied().unwrap_or(0.0);

    Ok(RawDetectionSet::new(boxes, classes, scores, count))
  }
}

/// 按 URL 方案选择的模型
pub enum ModelWrapper {
  #[cfg(feature = "model_rknpu")]
  Rknn(RknnModel),
  #[cfg(feature = "model_tract")]
  Tract(TractModel),
}

pub enum EngineWrapper {
  #[cfg(feature = "model_rknpu")]
  Rknn(RknnEngine),
  #[cfg(feature = "model_tract")]
  Tract(TractEngine),
}

impl FromUrl for ModelWrapper {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_rknpu")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnModel::SCHEME {
        return Ok(ModelWrapper::Rknn(RknnModel::from_url(url)?));
      }
    }
    #[cfg(feature = "model_tract")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == TractModel::SCHEME {
        return Ok(ModelWrapper::Tract(TractModel::from_url(url)?));
      }
    }
    Err(ModelLoadError::ModelPath(format!(
      "不支持的模型方案: {}",
      url.scheme()
    )))
  }
}

impl ModelFile for ModelWrapper {
  type Engine = EngineWrapper;

  fn input_size(&self) -> (u32, u32) {
    match self {
      #[cfg(feature = "model_rknpu")]
      ModelWrapper::Rknn(model) => model.input_size(),
      #[cfg(feature = "model_tract")]
      ModelWrapper::Tract(model) => model.input_size(),
    }
  }

  fn output_names(&self) -> Option<Vec<String>> {
    match self {
      #[cfg(feature = "model_rknpu")]
      ModelWrapper::Rknn(model) => model.output_names(),
      #[cfg(feature = "model_tract")]
      ModelWrapper::Tract(model) => model.output_names(),
    }
  }

  fn output_count(&self) -> usize {
    match self {
      #[cfg(feature = "model_rknpu")]
      ModelWrapper::Rknn(model) => model.output_count(),
      #[cfg(feature = "model_tract")]
      ModelWrapper::Tract(model) => model.output_count(),
    }
  }

  fn allocate(self) -> Result<Self::Engine, ModelLoadError> {
    match self {
      #[cfg(feature = "model_rknpu")]
      ModelWrapper::Rknn(model) => model.allocate().map(EngineWrapper::Rknn),
      #[cfg(feature = "model_tract")]
      ModelWrapper::Tract(model) => model.allocate().map(EngineWrapper::Tract),
    }
  }
}

impl Engine for EngineWrapper {
  fn name(&self) -> &'static str {
    match self {
      #[cfg(feature = "model_rknpu")]
      EngineWrapper::Rknn(engine) => engine.name(),
      #[cfg(feature = "model_tract")]
      EngineWrapper::Tract(engine) => engine.name(),
    }
  }

  fn forward(&mut self, slot: usize, input: &InputTensor) -> Result<Vec<Vec<f32>>, InferenceError> {
    match self {
      #[cfg(feature = "model_rknpu")]
      EngineWrapper::Rknn(engine) => engine.forward(slot, input),
      #[cfg(feature = "model_tract")]
      EngineWrapper::Tract(engine) => engine.forward(slot, input),
    }
  }
}

/// 从 URL 查询参数读取输入尺寸覆盖，如 `?width=300&height=300`
pub(crate) fn input_size_override(url: &Url) -> Result<Option<(u32, u32)>, ModelLoadError> {
  let mut width = None;
  let mut height = None;
  for (k, v) in url.query_pairs() {
    let parse = |v: &str| {
      v.parse::<u32>()
        .map_err(|_| ModelLoadError::ModelPath(format!("无效的输入尺寸 {}={}", k, v)))
    };
    match k.as_ref() {
      "width" => width = Some(parse(&v)?),
      "height" => height = Some(parse(&v)?),
      _ => {}
    }
  }

  match (width, height) {
    (Some(w), Some(h)) => Ok(Some((w, h))),
    (None, None) => Ok(None),
    _ => Err(ModelLoadError::ModelPath(
      "width 与 height 需同时指定".to_string(),
    )),
  }
}
