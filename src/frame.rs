// 该文件是 Guanlan （观澜） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::{DynamicImage, RgbImage};
use thiserror::Error;

use crate::input::AsNhwcFrame;

const RGB_CHANNELS: usize = 3;

/// 模型输入方块边长
pub const TILE_SIZE: u32 = 640;

/// 送入模型的 640x640 RGB 方块
pub type TileFrame = RgbNhwcFrame<TILE_SIZE, TILE_SIZE>;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNhwcFrame<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    let expected = RGB_CHANNELS * W as usize * H as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> TryFrom<RgbImage> for RgbNhwcFrame<W, H> {
  type Error = FrameError;

  fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
    // RgbImage 本身就是 HWC 排布
    Self::try_from(image.into_raw())
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    let data = vec![0u8; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  /// 取 (x, y) 处的像素
  pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
    let idx = (y * self.width() + x) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }
}

impl<const W: u32, const H: u32> AsNhwcFrame<W, H> for RgbNhwcFrame<W, H> {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  /// 任意像素格式的图像，灰度图会被扩展为三通道
  pub fn from_dynamic(image: DynamicImage, index: u64, timestamp_ms: u64) -> Self {
    Self::new(image.to_rgb8(), index, timestamp_ms)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma};

  #[test]
  fn tile_rejects_wrong_length() {
    let err = RgbNhwcFrame::<4, 2>::try_from(vec![0u8; 10]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 24,
        actual: 10
      }
    ));
  }

  #[test]
  fn tile_keeps_hwc_layout() {
    let mut image = RgbImage::new(4, 2);
    image.put_pixel(3, 1, image::Rgb([1, 2, 3]));
    let tile = RgbNhwcFrame::<4, 2>::try_from(image).unwrap();
    assert_eq!(tile.pixel(3, 1), [1, 2, 3]);
    assert_eq!(tile.pixel(0, 0), [0, 0, 0]);
    assert_eq!(&tile.as_nhwc()[21..24], &[1, 2, 3]);
  }

  #[test]
  fn grayscale_frame_becomes_rgb() {
    let gray = GrayImage::from_pixel(3, 2, Luma([77]));
    let frame = Frame::from_dynamic(DynamicImage::ImageLuma8(gray), 5, 40);
    assert_eq!((frame.width(), frame.height()), (3, 2));
    assert_eq!(frame.image.get_pixel(2, 1).0, [77, 77, 77]);
    assert_eq!(frame.index, 5);
  }
}
