// 该文件是 Shanan （山南西风） 项目的一部分。
// src/reaction/log.rs - 入侵记录文件
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

use std::{
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

/// 一条记录，格式 `1 2026-10-16T08:30:00.123456`
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
  pub human_present: bool,
  pub timestamp: DateTime<Local>,
}

impl LogRecord {
  pub fn now(human_present: bool) -> Self {
    Self {
      human_present,
      timestamp: Local::now(),
    }
  }

  pub fn to_line(&self) -> String {
    format!(
      "{} {}\n",
      u8::from(self.human_present),
      self.timestamp.format("%Y-%m-%dT%H:%M:%S%.6f")
    )
  }
}

/// 只追加的记录文件，每次写入都以追加模式重新打开
#[derive(Debug, Clone)]
pub struct IntruderLog {
  path: PathBuf,
}

impl IntruderLog {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn append(&self, record: &LogRecord) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    file.write_all(record.to_line().as_bytes())
  }
}
