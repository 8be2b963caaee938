// 该文件是 Guanlan （观澜） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

const CAMERA_INPUT: &str = "camera";

/// Guanlan 目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像路径，或 `camera` 表示使用摄像头实时检测
  #[arg(value_name = "INPUT")]
  pub input: String,

  /// 模型文件路径 (*.rknn) 或 rknn:///path 形式的地址
  #[arg(value_name = "MODEL")]
  pub model: String,

  /// 摄像头地址
  #[arg(long, value_name = "URL", default_value = "v4l:///dev/video0")]
  pub camera: Url,

  /// 输出地址，例如 image:///tmp/out.png 或 folder:///data/records?record
  /// 单图模式默认保存到输入图像旁的 output_<文件名>，
  /// 摄像头模式默认保存到当前目录下的 detections/
  #[arg(long, value_name = "URL")]
  pub output: Option<Url>,

  /// 标签字体文件，未指定时只绘制检测框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 摄像头模式下处理的帧数，未指定时直到 Ctrl-C
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
}

impl Args {
  pub fn is_camera(&self) -> bool {
    self.input.eq_ignore_ascii_case(CAMERA_INPUT)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_single_image_invocation() {
    let args = Args::try_parse_from(["guanlan", "bus.jpg", "yolo.rknn"]).unwrap();
    assert!(!args.is_camera());
    assert_eq!(args.model, "yolo.rknn");
    assert_eq!(args.camera.as_str(), "v4l:///dev/video0");
    assert!(args.output.is_none());
  }

  #[test]
  fn parses_camera_invocation() {
    let args = Args::try_parse_from([
      "guanlan",
      "camera",
      "yolo.rknn",
      "--frame-number",
      "90",
      "--output",
      "folder:///tmp/records?always",
    ])
    .unwrap();
    assert!(args.is_camera());
    assert_eq!(args.frame_number, Some(90));
    assert_eq!(args.output.unwrap().scheme(), "folder");
  }

  #[test]
  fn missing_model_is_an_error() {
    assert!(Args::try_parse_from(["guanlan", "bus.jpg"]).is_err());
  }
}
