// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 帧输入源
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

use crate::{FromUrl, frame::FrameBuffer};

#[cfg(not(any(feature = "read_image_file", feature = "v4l_input")))]
compile_error!("至少需要启用一个输入源: read_image_file 或 v4l_input");

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::V4lInput;

/// 阻塞式帧生产者
///
/// 每次调用把下一帧写入同一块 `FrameBuffer`。来不及处理的帧由源自行丢弃，
/// 调用方不提供背压。
pub trait FrameSource {
  /// 源的原生分辨率 (宽, 高)
  fn resolution(&self) -> (u32, u32);

  /// 阻塞直到下一帧写入 `buffer`；源耗尽时返回 `Ok(false)`
  fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<bool, InputError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
  fn resolution(&self) -> (u32, u32) {
    (**self).resolution()
  }

  fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<bool, InputError> {
    (**self).capture_into(buffer)
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("V4L error: {0}")]
  V4lError(String),
  #[error("Invalid input parameter: {0}")]
  InvalidParameter(String),
}

/// 按 URL 方案选择的输入源
pub enum InputWrapper {
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        return Ok(InputWrapper::V4l(V4lInput::from_url(url)?));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn resolution(&self) -> (u32, u32) {
    match self {
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.resolution(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.resolution(),
    }
  }

  fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<bool, InputError> {
    match self {
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.capture_into(buffer),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.capture_into(buffer),
    }
  }
}

/// 读取 URL 查询参数中的无符号整数
pub(crate) fn query_u32(url: &url::Url, key: &str) -> Result<Option<u32>, InputError> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| {
      v.parse::<u32>()
        .map_err(|_| InputError::InvalidParameter(format!("{}={}", key, v)))
    })
    .transpose()
}
