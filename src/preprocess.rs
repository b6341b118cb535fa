// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use std::str::FromStr;

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

use crate::frame::{FrameEncoding, InputTensor, RawFrame};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像解码失败: {0}")]
  Image(#[from] image::ImageError),
  #[error("YUYV 数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  YuyvLength { expected: usize, actual: usize },
  #[error("空帧")]
  Empty,
}

/// 缩放滤波器
///
/// 只提供平滑滤波，最近邻插值会明显降低检测精度，因此不可选。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
  #[default]
  Lanczos3,
  CatmullRom,
  Gaussian,
  Triangle,
}

impl From<ResizeFilter> for FilterType {
  fn from(filter: ResizeFilter) -> Self {
    match filter {
      ResizeFilter::Lanczos3 => FilterType::Lanczos3,
      ResizeFilter::CatmullRom => FilterType::CatmullRom,
      ResizeFilter::Gaussian => FilterType::Gaussian,
      ResizeFilter::Triangle => FilterType::Triangle,
    }
  }
}

impl FromStr for ResizeFilter {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "lanczos3" | "antialias" => Ok(ResizeFilter::Lanczos3),
      "catmullrom" | "catmull-rom" | "bicubic" => Ok(ResizeFilter::CatmullRom),
      "gaussian" => Ok(ResizeFilter::Gaussian),
      "triangle" | "bilinear" => Ok(ResizeFilter::Triangle),
      other => Err(format!("不支持的缩放滤波器: {}", other)),
    }
  }
}

/// 将原始帧转换为模型所需的 NHWC 张量
#[derive(Debug, Clone, Copy, Default)]
pub struct FramePreprocessor {
  filter: ResizeFilter,
}

impl FramePreprocessor {
  pub fn new(filter: ResizeFilter) -> Self {
    Self { filter }
  }

  pub fn filter(&self) -> ResizeFilter {
    self.filter
  }

  /// 解码为原始分辨率的 RGB 图像
  pub fn decode(&self, raw: &RawFrame<'_>) -> Result<RgbImage, DecodeError> {
    if raw.bytes.is_empty() {
      return Err(DecodeError::Empty);
    }

    match raw.encoding {
      FrameEncoding::Compressed => Ok(image::load_from_memory(raw.bytes)?.to_rgb8()),
      FrameEncoding::Yuyv => yuyv_to_rgb(raw.bytes, raw.width, raw.height),
    }
  }

  /// 直接缩放到目标尺寸，不裁剪、不保持宽高比
  pub fn resize(&self, image: &RgbImage, target_width: u32, target_height: u32) -> InputTensor {
    let resized = if image.dimensions() == (target_width, target_height) {
      image.clone()
    } else {
      image::imageops::resize(image, target_width, target_height, self.filter.into())
    };

    let (width, height) = resized.dimensions();
    // RgbImage 本身就是行主序的 HWC 排列
    InputTensor::from_nhwc(resized.into_raw(), width, height)
      .unwrap_or_else(|| InputTensor::zeros(target_width, target_height))
  }

  pub fn prepare(
    &self,
    raw: &RawFrame<'_>,
    target_width: u32,
    target_height: u32,
  ) -> Result<InputTensor, DecodeError> {
    let image = self.decode(raw)?;
    Ok(self.resize(&image, target_width, target_height))
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, DecodeError> {
  let expected = (width as usize) * (height as usize) * 2;
  if yuyv.len() < expected || expected == 0 {
    return Err(DecodeError::YuyvLength {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut rgb = Vec::with_capacity((width as usize) * (height as usize) * 3);
  for chunk in yuyv[..expected].chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  RgbImage::from_raw(width, height, rgb).ok_or(DecodeError::YuyvLength {
    expected,
    actual: yuyv.len(),
  })
}
