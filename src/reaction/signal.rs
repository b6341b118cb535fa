// 该文件是 Shanan （山南西风） 项目的一部分。
// src/reaction/signal.rs - 数字输出引脚
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
  fs,
  path::{Path, PathBuf},
  thread,
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SignalError {
  #[error("GPIO {pin} I/O 错误: {source}")]
  Io { pin: u32, source: std::io::Error },
}

/// 一条电平输出线
pub trait SignalLine {
  fn set(&mut self, level: bool) -> Result<(), SignalError>;

  /// 可在其他线程拉低该线的句柄，没有实际引脚时返回 `None`
  fn release_handle(&self) -> Option<ReleaseHandle> {
    None
  }
}

impl<T: SignalLine + ?Sized> SignalLine for Box<T> {
  fn set(&mut self, level: bool) -> Result<(), SignalError> {
    (**self).set(level)
  }

  fn release_handle(&self) -> Option<ReleaseHandle> {
    (**self).release_handle()
  }
}

/// 强制退出时用于拉低引脚，不经过 `Drop`
#[derive(Debug, Clone)]
pub struct ReleaseHandle {
  pin: u32,
  value_path: PathBuf,
}

impl ReleaseHandle {
  pub fn release(&self) -> Result<(), SignalError> {
    fs::write(&self.value_path, "0").map_err(|source| SignalError::Io {
      pin: self.pin,
      source,
    })
  }
}

/// 无 GPIO 的主机上使用，只记录日志
#[derive(Debug, Default)]
pub struct NullSignal;

impl SignalLine for NullSignal {
  fn set(&mut self, level: bool) -> Result<(), SignalError> {
    debug!("信号电平: {}", level);
    Ok(())
  }
}

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// 通过 sysfs 驱动的 GPIO 输出引脚
#[derive(Debug)]
pub struct SysfsGpio {
  pin: u32,
  value_path: PathBuf,
}

impl SysfsGpio {
  /// 导出引脚并设置为输出
  pub fn open(pin: u32) -> Result<Self, SignalError> {
    Self::open_at(SYSFS_GPIO_ROOT, pin)
  }

  pub fn open_at(root: impl AsRef<Path>, pin: u32) -> Result<Self, SignalError> {
    let root = root.as_ref();
    let io = |source| SignalError::Io { pin, source };
    let pin_dir = root.join(format!("gpio{}", pin));

    if !pin_dir.exists() {
      info!("导出 GPIO {}", pin);
      fs::write(root.join("export"), pin.to_string()).map_err(io)?;
      // udev 需要一点时间修正新节点的权限
      for _ in 0..10 {
        if pin_dir.join("direction").exists() {
          break;
        }
        thread::sleep(Duration::from_millis(20));
      }
    }

    fs::write(pin_dir.join("direction"), "out").map_err(io)?;
    info!("GPIO {} 设置为输出", pin);

    Ok(Self {
      pin,
      value_path: pin_dir.join("value"),
    })
  }

  pub fn pin(&self) -> u32 {
    self.pin
  }
}

impl SignalLine for SysfsGpio {
  fn set(&mut self, level: bool) -> Result<(), SignalError> {
    fs::write(&self.value_path, if level { "1" } else { "0" }).map_err(|source| {
      SignalError::Io {
        pin: self.pin,
        source,
      }
    })
  }

  fn release_handle(&self) -> Option<ReleaseHandle> {
    Some(ReleaseHandle {
      pin: self.pin,
      value_path: self.value_path.clone(),
    })
  }
}
