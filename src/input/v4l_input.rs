// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

use std::{io, time::Duration};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture as VideoCapture,
};

use crate::{FromUrl, FromUrlWithScheme, input::Capture, url_file_path};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法打开设备 {0}: {1}")]
  OpenDevice(String, io::Error),
  #[error("V4L 错误: {0}")]
  V4lError(#[from] io::Error),
  #[error("无效的参数 {0}: {1}")]
  InvalidParameter(String, String),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("帧数据长度 {actual} 小于 {expected}")]
  ShortBuffer { expected: usize, actual: usize },
  #[error("MJPG 解码失败: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("设备已释放")]
  Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Rgb3,
  Yuyv,
  Mjpg,
}

impl PixelFormat {
  fn from_fourcc(fourcc: &FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"RGB3" => Some(PixelFormat::Rgb3),
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"MJPG" => Some(PixelFormat::Mjpg),
      _ => None,
    }
  }
}

/// V4L2 摄像头，`v4l:///dev/video0?width=1280&height=720`
pub struct V4lInput {
  stream: Option<Stream<'static>>,
  device_path: String,
  width: u32,
  height: u32,
  format: PixelFormat,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemeMismatch);
    }

    let path = url_file_path(url);
    let device_path = if path.is_empty() || path == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      path
    };

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    for (key, value) in url.query_pairs() {
      let parse = |value: &str| {
        value
          .parse::<u32>()
          .map_err(|e| V4lInputError::InvalidParameter(key.to_string(), e.to_string()))
      };
      match key.as_ref() {
        "width" => width = parse(&value)?,
        "height" => height = parse(&value)?,
        other => warn!("忽略未知参数: {}", other),
      }
    }

    Self::open(&device_path, width, height)
  }
}

impl V4lInput {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lInputError> {
    info!("打开摄像头 {}，请求分辨率 {}x{}", device_path, width, height);
    let device = Device::with_path(device_path)
      .map_err(|e| V4lInputError::OpenDevice(device_path.to_string(), e))?;

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"RGB3");
    let format = device.set_format(&format)?;

    let pixel_format = PixelFormat::from_fourcc(&format.fourcc)
      .ok_or_else(|| V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()))?;
    info!(
      "摄像头格式: {}x{} {}",
      format.width, format.height, format.fourcc
    );

    let mut stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)?;
    stream.set_timeout(CAPTURE_TIMEOUT);

    Ok(Self {
      stream: Some(stream),
      device_path: device_path.to_string(),
      width: format.width,
      height: format.height,
      format: pixel_format,
    })
  }

  fn decode(&self, data: &[u8]) -> Result<RgbImage, V4lInputError> {
    let pixels = self.width as usize * self.height as usize;
    match self.format {
      PixelFormat::Rgb3 => {
        let expected = pixels * 3;
        if data.len() < expected {
          return Err(V4lInputError::ShortBuffer {
            expected,
            actual: data.len(),
          });
        }
        RgbImage::from_raw(self.width, self.height, data[..expected].to_vec()).ok_or(
          V4lInputError::ShortBuffer {
            expected,
            actual: data.len(),
          },
        )
      }
      PixelFormat::Yuyv => {
        let expected = pixels * 2;
        if data.len() < expected {
          return Err(V4lInputError::ShortBuffer {
            expected,
            actual: data.len(),
          });
        }
        let rgb = yuyv_to_rgb(&data[..expected]);
        RgbImage::from_raw(self.width, self.height, rgb).ok_or(V4lInputError::ShortBuffer {
          expected,
          actual: data.len(),
        })
      }
      PixelFormat::Mjpg => {
        Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8())
      }
    }
  }
}

impl Capture for V4lInput {
  type Error = V4lInputError;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
    let stream = self.stream.as_mut().ok_or(V4lInputError::Released)?;
    let data = match stream.next() {
      Ok((buffer, meta)) => {
        let used = (meta.bytesused as usize).min(buffer.len());
        if used == 0 {
          buffer.to_vec()
        } else {
          buffer[..used].to_vec()
        }
      }
      Err(e) if e.kind() == io::ErrorKind::TimedOut => {
        warn!("摄像头 {} 读取超时", self.device_path);
        return Ok(None);
      }
      Err(e) => return Err(e.into()),
    };
    debug!("读取 {} 字节帧数据", data.len());
    self.decode(&data).map(Some)
  }

  fn release(&mut self) {
    if self.stream.take().is_some() {
      info!("关闭摄像头 {}", self.device_path);
    }
  }
}

/// YUYV 4:2:2 转 RGB，每 4 字节产生 2 个像素
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
  let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
  let convert = |y: f32, u: f32, v: f32| {
    [
      (y + 1.402 * v).clamp(0.0, 255.0) as u8,
      (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
      (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ]
  };

  for chunk in yuyv.chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    rgb.extend_from_slice(&convert(chunk[0] as f32, u, v));
    rgb.extend_from_slice(&convert(chunk[2] as f32, u, v));
  }
  rgb
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_neutral_chroma_is_gray() {
    let rgb = yuyv_to_rgb(&[16, 128, 235, 128]);
    assert_eq!(rgb, vec![16, 16, 16, 235, 235, 235]);
  }

  #[test]
  fn yuyv_ignores_trailing_bytes() {
    let rgb = yuyv_to_rgb(&[100, 128, 100, 128, 7, 7]);
    assert_eq!(rgb.len(), 6);
  }

  #[test]
  fn yuyv_red_chroma() {
    let rgb = yuyv_to_rgb(&[81, 90, 81, 240]);
    assert!(rgb[0] > 200 && rgb[1] < 60 && rgb[2] < 60, "{:?}", rgb);
  }

  #[test]
  fn fourcc_mapping() {
    assert_eq!(
      PixelFormat::from_fourcc(&FourCC::new(b"YUYV")),
      Some(PixelFormat::Yuyv)
    );
    assert_eq!(PixelFormat::from_fourcc(&FourCC::new(b"NV12")), None);
  }
}
