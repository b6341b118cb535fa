// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头连续采集
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

use std::pin::Pin;

use tracing::{info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameBuffer, FrameEncoding},
  input::{FrameSource, InputError, query_u32},
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

fn v4l_error(e: impl std::fmt::Display) -> InputError {
  InputError::V4lError(e.to_string())
}

/// V4L2 摄像头输入源
///
/// 优先协商 MJPEG，帧以压缩形式交给预处理；摄像头不支持时退回 YUYV。
/// mmap 缓冲按先进先出排队，处理跟不上时驱动丢弃新到的帧，
/// 循环拿到的帧最多落后 `STREAM_BUFFERS` 次采集。
pub struct V4lInput {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  width: u32,
  height: u32,
  encoding: FrameEncoding,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = InputError;

  /// `v4l:///dev/video0?width=640&height=480`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE
    } else {
      url.path()
    };
    let width = query_u32(url, "width")?.unwrap_or(DEFAULT_WIDTH);
    let height = query_u32(url, "height")?.unwrap_or(DEFAULT_HEIGHT);

    Self::open(device_path, width, height)
  }
}

impl V4lInput {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, InputError> {
    info!("打开摄像头: {}", device_path);
    let device = Box::pin(Device::with_path(device_path).map_err(v4l_error)?);

    let mut format = device.format().map_err(v4l_error)?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"MJPG");
    let mut format = device.set_format(&format).map_err(v4l_error)?;

    if format.fourcc != FourCC::new(b"MJPG") {
      warn!("摄像头不支持 MJPEG，改用 YUYV");
      format.fourcc = FourCC::new(b"YUYV");
      format = device.set_format(&format).map_err(v4l_error)?;
    }

    let encoding = if format.fourcc == FourCC::new(b"MJPG") {
      FrameEncoding::Compressed
    } else if format.fourcc == FourCC::new(b"YUYV") {
      FrameEncoding::Yuyv
    } else {
      return Err(InputError::V4lError(format!(
        "不支持的像素格式: {}",
        format.fourcc
      )));
    };

    info!(
      "摄像头格式: {}x{} {}",
      format.width, format.height, format.fourcc
    );

    let mut input = Self {
      device,
      stream: None,
      width: format.width,
      height: format.height,
      encoding,
    };

    // SAFETY: device 被 Pin<Box> 固定，不会移动，所以引用始终有效；
    // Drop 中先取出 stream，再释放 device
    let device_ref: &Device = &input.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS).map_err(v4l_error)?
    };

    input.stream = Some(stream);
    Ok(input)
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    if self.stream.take().is_some() {
      info!("释放摄像头");
    }
  }
}

impl FrameSource for V4lInput {
  fn resolution(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<bool, InputError> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(false);
    };

    let (data, meta) = stream.next().map_err(v4l_error)?;
    let used = (meta.bytesused as usize).min(data.len());
    buffer.fill(&data[..used], self.width, self.height, self.encoding);
    Ok(true)
  }
}
