// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input.rs - 图像与摄像头输入
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

use image::RgbImage;
use thiserror::Error;

use crate::FromUrl;

pub trait AsNhwcFrame<const W: u32, const H: u32> {
  fn as_nhwc(&self) -> &[u8];
}

/// 帧采集设备
///
/// `Ok(None)` 表示本次没有读到帧，调用方可以稍后重试。
pub trait Capture {
  type Error: std::error::Error + Send + Sync + 'static;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;

  /// 释放底层设备
  fn release(&mut self) {}
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl From<std::convert::Infallible> for InputError {
  fn from(never: std::convert::Infallible) -> Self {
    match never {}
  }
}

/// 按 URL 方案选择的采集设备
pub enum CaptureWrapper {
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
}

impl FromUrl for CaptureWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        return Ok(CaptureWrapper::V4l(V4lInput::from_url(url)?));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(CaptureWrapper::ImageFile(ImageFileInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Capture for CaptureWrapper {
  type Error = InputError;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
    match *self {
      #[cfg(feature = "read_image_file")]
      CaptureWrapper::ImageFile(ref mut input) => Ok(input.read_frame()?),
      #[cfg(feature = "v4l_input")]
      CaptureWrapper::V4l(ref mut input) => Ok(input.read_frame()?),
    }
  }

  fn release(&mut self) {
    match *self {
      #[cfg(feature = "read_image_file")]
      CaptureWrapper::ImageFile(ref mut input) => input.release(),
      #[cfg(feature = "v4l_input")]
      CaptureWrapper::V4l(ref mut input) => input.release(),
    }
  }
}
