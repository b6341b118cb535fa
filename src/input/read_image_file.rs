// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameBuffer, FrameEncoding},
  input::{FrameSource, InputError, query_u32},
};

/// 把同一张图片当作连续帧重复送出
///
/// `image:///path/to/frame.jpg?repeat=100`，省略 `repeat` 时只送出一次，
/// `repeat=0` 表示无限重复。文件内容保持编码状态，与摄像头 MJPEG 帧一致。
pub struct ImageFileInput {
  bytes: Vec<u8>,
  width: u32,
  height: u32,
  remaining: Option<u32>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let remaining = match query_u32(url, "repeat")? {
      Some(0) => None,
      Some(n) => Some(n),
      None => Some(1),
    };

    Self::open(url.path(), remaining)
  }
}

impl ImageFileInput {
  /// `remaining` 为 `None` 时无限重复
  pub fn open(path: &str, remaining: Option<u32>) -> Result<Self, InputError> {
    let bytes = std::fs::read(path)?;
    let (width, height) = ImageReader::new(std::io::Cursor::new(&bytes))
      .with_guessed_format()?
      .into_dimensions()?;
    debug!("图像文件 {}: {}x{}", path, width, height);

    Ok(Self {
      bytes,
      width,
      height,
      remaining,
    })
  }
}

impl FrameSource for ImageFileInput {
  fn resolution(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<bool, InputError> {
    match self.remaining.as_mut() {
      Some(0) => return Ok(false),
      Some(n) => *n -= 1,
      None => {}
    }
    buffer.fill(
      &self.bytes,
      self.width,
      self.height,
      FrameEncoding::Compressed,
    );
    Ok(true)
  }
}
