// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::{path::Path, sync::Arc};

use ab_glyph::{FontVec, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::Frame,
  metrics::FrameStatus,
  model::{DetectItem, DetectResult},
};

const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: u32 = 2;
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_OFFSET: i32 = 10;
const STATUS_ORIGIN: (i32, i32) = (10, 10);
const STATUS_LINE_SPACING: i32 = 40;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] InvalidFont),
}

/// 绘制样式，未设置字体时只画框
#[derive(Clone)]
pub struct Draw {
  color: Rgb<u8>,
  thickness: u32,
  font: Option<Arc<FontVec>>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: Rgb(BOX_COLOR),
      thickness: BOX_THICKNESS,
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Draw {
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    self.font = Some(Arc::new(FontVec::try_from_vec(data)?));
    info!("加载标签字体: {}", path.display());
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn draw_item(&self, image: &mut RgbImage, item: &DetectItem) {
    let [x0, y0] = item.top_left();
    let [x1, y1] = item.bottom_right();
    let (left, top) = (x0 as i32, y0 as i32);
    let (right, bottom) = (x1 as i32, y1 as i32);
    if right <= left || bottom <= top {
      return;
    }

    // 向内加粗
    for t in 0..self.thickness as i32 {
      let width = right - left - 2 * t;
      let height = bottom - top - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(left + t, top + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.color);
    }

    if let Some(font) = &self.font {
      let label = format!("Class: {}, Conf: {:.2}", item.class_id, item.confidence);
      let y = (top - LABEL_OFFSET - self.font_size as i32).max(0);
      draw_text_mut(
        image,
        self.color,
        left.max(0),
        y,
        PxScale::from(self.font_size),
        &**font,
        &label,
      );
    }
  }

  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.items.iter() {
      self.draw_item(image, item);
    }
  }

  /// 左上角绘制帧率与帧间隔，未设置字体时不绘制
  pub fn draw_status(&self, image: &mut RgbImage, status: &FrameStatus) {
    let Some(font) = &self.font else {
      return;
    };
    let lines = [
      format!("FPS: {:.1}", status.fps),
      format!(
        "Frame Interval: {:.1}ms",
        status.interval.as_secs_f64() * 1000.0
      ),
    ];
    let (x, y) = STATUS_ORIGIN;
    for (row, line) in lines.iter().enumerate() {
      draw_text_mut(
        image,
        self.color,
        x,
        y + row as i32 * STATUS_LINE_SPACING,
        PxScale::from(self.font_size),
        &**font,
        line,
      );
    }
  }

  /// 在帧的副本上绘制
  pub fn annotate(&self, frame: &Frame, result: &DetectResult) -> RgbImage {
    let mut image = frame.image.clone();
    self.draw_detections(&mut image, result);
    image
  }
}
