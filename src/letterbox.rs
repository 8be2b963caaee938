// 该文件是 Guanlan （观澜） 项目的一部分。
// src/letterbox.rs - 信箱式缩放与坐标逆映射
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

//! # 信箱变换
//!
//! 任意宽高比的帧先按宽度缩放到 640，高度等比缩放为 `scaled_height`，
//! 再贴入 640x640 的全零方块，上下各留 `bar_height` 行黑边：
//!
//! ```text
//! +----------------------+  0
//! |        黑边          |
//! +----------------------+  bar_height
//! |     缩放后的帧       |
//! +----------------------+  bar_height + scaled_height
//! |        黑边          |
//! +----------------------+  640
//! ```
//!
//! 模型输出的坐标是相对整个方块的比例，[`inverse_map`] 负责去掉黑边并还原到
//! 原图像素坐标。水平方向没有填充，因此 `cx` 与 `w` 只需乘以原图宽度。
//!
//! 竖幅帧（高大于宽）按 `scaled_height = 640`、`bar_height = 0` 处理，
//! 即垂直方向被压缩，逆映射仍然精确。

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

use crate::frame::{Frame, FrameError, TILE_SIZE, TileFrame};

#[derive(Error, Debug)]
pub enum LetterboxError {
  #[error("图像尺寸无效: {height}x{width}")]
  InvalidDimensions { height: u32, width: u32 },
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 单帧的缩放几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetterboxGeometry {
  /// 缩放后的帧高度
  pub scaled_height: u32,
  /// 上方黑边高度，下方黑边吸收取整余量
  pub bar_height: u32,
}

/// 计算缩放高度与黑边高度
pub fn compute_geometry(
  frame_height: u32,
  frame_width: u32,
) -> Result<LetterboxGeometry, LetterboxError> {
  if frame_height == 0 || frame_width == 0 {
    return Err(LetterboxError::InvalidDimensions {
      height: frame_height,
      width: frame_width,
    });
  }

  let scaled_height = (TILE_SIZE as u64 * frame_height as u64 / frame_width as u64)
    .clamp(1, TILE_SIZE as u64) as u32;
  let bar_height = (TILE_SIZE - scaled_height) / 2;

  Ok(LetterboxGeometry {
    scaled_height,
    bar_height,
  })
}

/// 缩放并贴入 640x640 方块
pub fn build_tile(
  image: &RgbImage,
  geometry: &LetterboxGeometry,
) -> Result<TileFrame, LetterboxError> {
  if image.width() == 0 || image.height() == 0 {
    return Err(LetterboxError::InvalidDimensions {
      height: image.height(),
      width: image.width(),
    });
  }

  let resized = imageops::resize(
    image,
    TILE_SIZE,
    geometry.scaled_height,
    FilterType::Triangle,
  );

  let mut tile = RgbImage::new(TILE_SIZE, TILE_SIZE);
  imageops::replace(&mut tile, &resized, 0, geometry.bar_height as i64);

  Ok(TileFrame::try_from(tile)?)
}

/// 方块比例坐标下的中心点框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
}

impl From<[f32; 4]> for NormalizedBox {
  fn from([cx, cy, w, h]: [f32; 4]) -> Self {
    Self { cx, cy, w, h }
  }
}

/// 原图像素坐标下的中心点框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl PixelBox {
  /// 四个角点，顺序为左上、右上、左下、右下
  pub fn corners(&self) -> [[f32; 2]; 4] {
    let (half_w, half_h) = (self.width / 2.0, self.height / 2.0);
    [
      [self.x - half_w, self.y - half_h],
      [self.x + half_w, self.y - half_h],
      [self.x - half_w, self.y + half_h],
      [self.x + half_w, self.y + half_h],
    ]
  }
}

/// 将方块比例坐标还原为原图像素坐标
pub fn inverse_map(
  normalized: &NormalizedBox,
  geometry: &LetterboxGeometry,
  frame_height: u32,
  frame_width: u32,
) -> PixelBox {
  let tile = TILE_SIZE as f32;
  let scaled_height = geometry.scaled_height as f32;
  let bar_height = geometry.bar_height as f32;
  let (frame_height, frame_width) = (frame_height as f32, frame_width as f32);

  PixelBox {
    x: normalized.cx * frame_width,
    y: ((normalized.cy * tile - bar_height) / scaled_height) * frame_height,
    width: normalized.w * frame_width,
    height: normalized.h * tile / scaled_height * frame_height,
  }
}

/// 原始帧、模型输入方块与几何参数
#[derive(Debug, Clone)]
pub struct LetterboxedFrame {
  pub frame: Frame,
  pub tile: TileFrame,
  pub geometry: LetterboxGeometry,
}

impl LetterboxedFrame {
  pub fn new(frame: Frame) -> Result<Self, LetterboxError> {
    let geometry = compute_geometry(frame.height(), frame.width())?;
    debug!(
      "缩放高度: {}, 上下填充高度: {}",
      geometry.scaled_height, geometry.bar_height
    );
    let tile = build_tile(&frame.image, &geometry)?;
    Ok(Self {
      frame,
      tile,
      geometry,
    })
  }
}
