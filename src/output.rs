// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 检测结果标注输出
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

pub trait Render<Frame: ?Sized, Output: ?Sized> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "annotate")]
pub mod draw;

#[cfg(feature = "annotate")]
mod directory_record;
#[cfg(feature = "annotate")]
pub use self::directory_record::DirectoryRecordOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("未启用标注功能")]
  Disabled,
}

/// 逐帧标注输出
pub type Annotator = Box<dyn Render<image::RgbImage, [crate::detection::Detection], Error = OutputError>>;

/// 按 URL 打开标注输出，未指定时返回 `None`
pub fn open_annotator(url: Option<&url::Url>) -> Result<Option<Annotator>, OutputError> {
  let Some(url) = url else {
    return Ok(None);
  };

  #[cfg(feature = "annotate")]
  {
    use crate::FromUrl;

    let output = DirectoryRecordOutput::from_url(url)?;
    tracing::info!("标注帧输出: {}", url);
    Ok(Some(Box::new(output)))
  }
  #[cfg(not(feature = "annotate"))]
  {
    tracing::warn!("未启用 annotate 功能，忽略标注输出 {}", url);
    Err(OutputError::Disabled)
  }
}
