// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Datelike, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{Render, draw::Draw},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 保存原始帧，并在同名 `.json` 文件中记录检测结果
struct Record;

impl Record {
  fn record(
    &self,
    frame: &Frame,
    result: &DetectResult,
    path: &Path,
  ) -> Result<(), DirectoryRecordOutputError> {
    let detections: Vec<_> = result
      .items
      .iter()
      .map(|item| {
        json!({
          "class_id": item.class_id,
          "confidence": item.confidence,
          "corners": item.corners,
        })
      })
      .collect();
    let record = json!({
      "frame": frame.index,
      "timestamp_ms": frame.timestamp_ms,
      "width": frame.width(),
      "height": frame.height(),
      "detections": detections,
    });
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(&record)?,
    )?;
    Ok(())
  }
}

enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  fn save_result(
    &self,
    path: &Path,
    frame: &Frame,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.annotate(frame, result).save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.image.save(path)?;
        record.record(frame, result, path)?;
      }
    }
    Ok(())
  }
}

/// 按日期分目录保存帧，`folder:///data/records?record&always`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri.query_pairs().any(|(k, _)| k == "record");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let output = DirectoryRecordOutput::new(url_file_path(uri)).with_always(always);
    Ok(if record { output.recording() } else { output })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      draw: DrawWrapper::Draw(Box::default()),
      frame_counter: Mutex::new(0),
      always: false,
    }
  }

  /// 不绘制，改为保存原始帧与 JSON 记录
  pub fn recording(mut self) -> Self {
    self.draw = DrawWrapper::Record(Record);
    self
  }

  /// 没有检测结果的帧也保存
  pub fn with_always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    if let DrawWrapper::Draw(_) = self.draw {
      self.draw = DrawWrapper::Draw(Box::new(draw));
    }
    self
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<Frame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }
    let path = self.frame_path(Utc::now())?;
    debug!("记录第 {} 帧到 {}", frame.index, path.display());
    self.draw.save_result(&path, frame, result)
  }
}
