// 该文件是 Shanan （山南西风） 项目的一部分。
// src/label.rs - 类别标签表
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

use std::{collections::BTreeMap, path::Path};

use tracing::{debug, info};

use crate::config::ConfigError;

/// 类别编号到标签名称的只读映射
///
/// 同时支持 `0 person` / `0: person` 形式的带编号文件与每行一个标签的
/// 顺序文件。重复编号以最后一次出现为准。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  labels: BTreeMap<u32, String>,
}

fn is_separator(c: char) -> bool {
  c == ':' || c.is_whitespace()
}

/// 在第一段冒号/空白处拆分为至多两部分
fn split_pair(line: &str) -> (&str, Option<&str>) {
  match line.find(is_separator) {
    Some(pos) => {
      let rest = line[pos..].trim_start_matches(is_separator);
      (&line[..pos], Some(rest))
    }
    None => (line, None),
  }
}

impl LabelTable {
  /// 从标签文件加载
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::LabelFile {
      path: path.to_path_buf(),
      source,
    })?;
    let table = Self::parse(&content);
    info!("标签数量: {}", table.len());
    Ok(table)
  }

  /// 解析标签文本
  pub fn parse(content: &str) -> Self {
    let mut labels = BTreeMap::new();

    for (row, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }

      let (head, rest) = split_pair(line);
      let explicit = rest.and_then(|rest| {
        if head.bytes().all(|b| b.is_ascii_digit()) {
          head.parse::<u32>().ok().map(|id| (id, rest.trim()))
        } else {
          None
        }
      });

      let (id, label) = match explicit {
        Some((id, label)) => (id, label),
        None => (row as u32, line),
      };

      if let Some(old) = labels.insert(id, label.to_string()) {
        debug!("标签编号 {} 重复，{} 被 {} 覆盖", id, old, label);
      }
    }

    Self { labels }
  }

  pub fn get(&self, id: u32) -> Option<&str> {
    self.labels.get(&id).map(String::as_str)
  }

  /// 标签对应的最小编号
  pub fn find(&self, label: &str) -> Option<u32> {
    self
      .labels
      .iter()
      .find(|(_, name)| name.as_str() == label)
      .map(|(id, _)| *id)
  }

  /// 用于展示的标签，未知编号回退为数字
  pub fn display(&self, id: u32) -> String {
    self
      .get(id)
      .map(str::to_string)
      .unwrap_or_else(|| format!("#{}", id))
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn explicit_indices_with_space_and_colon() {
    let table = LabelTable::parse("0 person\n1: bicycle\n2  car\n");
    assert_eq!(table.get(0), Some("person"));
    assert_eq!(table.get(1), Some("bicycle"));
    assert_eq!(table.get(2), Some("car"));
    assert_eq!(table.len(), 3);
  }

  #[test]
  fn plain_list_uses_line_position() {
    let table = LabelTable::parse("person\n  bicycle  \ncar\n");
    assert_eq!(table.get(0), Some("person"));
    assert_eq!(table.get(1), Some("bicycle"));
    assert_eq!(table.get(2), Some("car"));
  }

  #[test]
  fn duplicate_index_keeps_last() {
    let table = LabelTable::parse("0 person\n1 car\n0 pedestrian\n");
    assert_eq!(table.get(0), Some("pedestrian"));
    assert_eq!(table.len(), 2);
  }

  #[test]
  fn non_numeric_head_keeps_whole_line() {
    let table = LabelTable::parse("traffic light\nstop sign\n");
    assert_eq!(table.get(0), Some("traffic light"));
    assert_eq!(table.get(1), Some("stop sign"));
  }

  #[test]
  fn overlong_index_falls_back_to_position() {
    let table = LabelTable::parse("99999999999 giant\n");
    assert_eq!(table.get(0), Some("99999999999 giant"));
  }

  #[test]
  fn blank_lines_count_toward_position() {
    let table = LabelTable::parse("person\n\ncar\n");
    assert_eq!(table.get(0), Some("person"));
    assert_eq!(table.get(1), None);
    assert_eq!(table.get(2), Some("car"));
  }

  #[test]
  fn mixed_file_and_find() {
    let table = LabelTable::parse("0 person\n1 car\nunknown\n");
    assert_eq!(table.get(2), Some("unknown"));
    assert_eq!(table.find("person"), Some(0));
    assert_eq!(table.find("car"), Some(1));
    assert_eq!(table.find("dog"), None);
    assert_eq!(table.display(7), "#7");
  }

  #[test]
  fn missing_file_is_config_error() {
    let err = LabelTable::load("/nonexistent/labels.txt").unwrap_err();
    assert!(matches!(err, ConfigError::LabelFile { .. }));
  }
}
