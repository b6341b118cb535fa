// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 帧缓冲与 NHWC 输入张量
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

pub const RGB_CHANNELS: usize = 3;

/// 原始帧的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
  /// 由 `image` 识别格式的压缩图像（JPEG/PNG 等）
  Compressed,
  /// 打包的 YUYV 4:2:2
  Yuyv,
}

/// 单槽帧缓冲
///
/// 整个循环只持有这一块缓冲：采集写入，预处理读取，随后 `reset`
/// 截断长度但保留容量，下一帧写入同一块内存。
#[derive(Debug)]
pub struct FrameBuffer {
  data: Vec<u8>,
  width: u32,
  height: u32,
  encoding: FrameEncoding,
}

impl Default for FrameBuffer {
  fn default() -> Self {
    Self {
      data: Vec::new(),
      width: 0,
      height: 0,
      encoding: FrameEncoding::Compressed,
    }
  }
}

impl FrameBuffer {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      data: Vec::with_capacity(capacity),
      ..Self::default()
    }
  }

  /// 写入一帧，覆盖缓冲中已有内容
  pub fn fill(&mut self, bytes: &[u8], width: u32, height: u32, encoding: FrameEncoding) {
    self.data.clear();
    self.data.extend_from_slice(bytes);
    self.width = width;
    self.height = height;
    self.encoding = encoding;
  }

  /// 回绕并截断，保留已分配容量
  pub fn reset(&mut self) {
    self.data.clear();
    self.width = 0;
    self.height = 0;
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn capacity(&self) -> usize {
    self.data.capacity()
  }

  /// 当前帧的只读视图
  pub fn as_raw(&self) -> RawFrame<'_> {
    RawFrame {
      bytes: &self.data,
      width: self.width,
      height: self.height,
      encoding: self.encoding,
    }
  }
}

/// 一次循环迭代借用的原始帧
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
  pub bytes: &'a [u8],
  pub width: u32,
  pub height: u32,
  pub encoding: FrameEncoding,
}

impl<'a> RawFrame<'a> {
  pub fn compressed(bytes: &'a [u8], width: u32, height: u32) -> Self {
    Self {
      bytes,
      width,
      height,
      encoding: FrameEncoding::Compressed,
    }
  }
}

/// 模型输入张量，布局 `[1, H, W, 3]`，每通道一字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTensor {
  data: Box<[u8]>,
  width: u32,
  height: u32,
}

impl InputTensor {
  pub fn zeros(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      width,
      height,
    }
  }

  /// 由 NHWC 数据构造，长度不符时返回 `None`
  pub fn from_nhwc(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
    if data.len() != RGB_CHANNELS * (width as usize) * (height as usize) {
      return None;
    }
    Some(Self {
      data: data.into_boxed_slice(),
      width,
      height,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// 模型侧形状 `[1, H, W, 3]`
  pub fn shape(&self) -> [usize; 4] {
    [1, self.height as usize, self.width as usize, RGB_CHANNELS]
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}
