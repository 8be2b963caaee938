// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
  convert::Infallible,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, input::Capture, url_file_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法读取图像 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解码图像 {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 单张静态图像
///
/// 作为迭代器只产出一次；作为 [`Capture`] 时每次读取都返回同一张图像。
pub struct ImageFileInput {
  path: PathBuf,
  image: RgbImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    Self::open(url_file_path(url))
  }
}

impl ImageFileInput {
  /// 读取并解码图像，单通道图像会被扩展为 RGB
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref().to_path_buf();
    let io_error = |source| ImageFileInputError::IoError {
      path: path.clone(),
      source,
    };
    let image = ImageReader::open(&path)
      .map_err(io_error)?
      .with_guessed_format()
      .map_err(io_error)?
      .decode()
      .map_err(|source| ImageFileInputError::ImageLoadError {
        path: path.clone(),
        source,
      })?
      .to_rgb8();

    info!(
      "读取图像 {}，尺寸: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );
    Ok(Self { path, image })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  /// 转换为只产出一帧的迭代器
  pub fn into_frames(self) -> std::option::IntoIter<Frame> {
    Some(Frame::new(self.image, 0, 0)).into_iter()
  }
}

impl Capture for ImageFileInput {
  type Error = Infallible;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
    Ok(Some(self.image.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma, Rgb};

  #[test]
  fn opens_image_and_yields_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();

    let input = ImageFileInput::open(&path).unwrap();
    assert_eq!(input.path(), path.as_path());

    let mut frames = input.into_frames();
    let frame = frames.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 4));
    assert_eq!(frame.image.get_pixel(7, 3).0, [10, 20, 30]);
    assert!(frames.next().is_none());
  }

  #[test]
  fn grayscale_file_is_expanded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gray.png");
    GrayImage::from_pixel(5, 5, Luma([128])).save(&path).unwrap();

    let mut input = ImageFileInput::open(&path).unwrap();
    let image = input.read_frame().unwrap().unwrap();
    assert_eq!(image.get_pixel(2, 2).0, [128, 128, 128]);
    assert!(input.read_frame().unwrap().is_some());
  }

  #[test]
  fn missing_file_is_an_io_error() {
    assert!(matches!(
      ImageFileInput::open("/no/such/image.jpg"),
      Err(ImageFileInputError::IoError { .. })
    ));
  }

  #[test]
  fn from_url_checks_scheme() {
    let url = Url::parse("video:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));
  }
}
