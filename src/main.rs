// 该文件是 Guanlan （观澜） 项目的一部分。
// src/main.rs - 主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use guanlan::{
  FromUrl,
  input::{CaptureWrapper, ImageFileInput},
  model::{LoadModel, ModelWrapperBuilder},
  output::{
    DirectoryRecordOutput, OutputWrapper, SaveImageFileOutput, annotated_output_path, draw::Draw,
  },
  task::{ContinuousTask, OneShotTask, Task},
};

const CAMERA_RECORD_DIRECTORY: &str = "detections";

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("输入: {}", args.input);
  info!("模型: {}", args.model);

  let loader = ModelWrapperBuilder::from_location(&args.model)
    .with_context(|| format!("无法使用模型 {}", args.model))?;

  let draw = match &args.font {
    Some(font) => Draw::default()
      .with_font_file(font)
      .with_context(|| format!("无法加载字体 {}", font.display()))?,
    None => Draw::default(),
  };

  if args.is_camera() {
    info!("摄像头: {}", args.camera);
    let capture = CaptureWrapper::from_url(&args.camera).context("无法打开摄像头")?;
    let output = match &args.output {
      Some(url) => OutputWrapper::from_url(url)?,
      None => OutputWrapper::DirectoryRecord(DirectoryRecordOutput::new(CAMERA_RECORD_DIRECTORY)),
    }
    .with_draw(draw.clone());
    info!("加载模型...");
    let model = loader.load().context("模型加载失败")?;

    ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .with_overlay(draw)
      .run_task(capture, model, output)
  } else {
    let input = ImageFileInput::open(&args.input)
      .with_context(|| format!("无法读取图像 {}", args.input))?;
    let output = match &args.output {
      Some(url) => OutputWrapper::from_url(url)?,
      None => {
        let path = annotated_output_path(input.path());
        info!("输出路径: {}", path.display());
        OutputWrapper::SaveImageFile(SaveImageFileOutput::new(path))
      }
    }
    .with_draw(draw);

    OneShotTask.run_task(input.into_frames(), loader, output)
  }
}
