// 该文件是 Guanlan （观澜） 项目的一部分。
// src/detector.rs - 单图检测器
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

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::{
  frame::{Frame, TileFrame},
  letterbox::{LetterboxGeometry, build_tile, compute_geometry},
  metrics::{PhaseTimings, timed},
  model::{DetectResult, LoadModel, Model, RawPrediction},
  postprocess::postprocess,
};

/// 同步检测单张图像，模型在第一次检测时才加载
pub struct ImageDetector<L: LoadModel> {
  loader: L,
  model: Option<L::Model>,
}

impl<L, M, ME, LE> ImageDetector<L>
where
  L: LoadModel<Model = M, Error = LE>,
  M: Model<Input = TileFrame, Output = RawPrediction, Error = ME>,
  ME: std::error::Error + Send + Sync + 'static,
  LE: std::error::Error + Send + Sync + 'static,
{
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      model: None,
    }
  }

  pub fn is_loaded(&self) -> bool {
    self.model.is_some()
  }

  /// 立即加载模型，已加载时不做任何事
  pub fn load(&mut self) -> Result<&M> {
    if self.model.is_none() {
      info!("加载模型...");
      let model = self.loader.load().context("模型加载失败")?;
      self.model = Some(model);
    }
    self
      .model
      .as_ref()
      .ok_or_else(|| anyhow::anyhow!("模型未加载"))
  }

  /// 返回检测结果与各阶段耗时，`read` 与 `draw` 始终为零
  pub fn detect(&mut self, frame: &Frame) -> Result<(DetectResult, PhaseTimings)> {
    let (tile, preprocess) = timed(|| -> Result<(TileFrame, LetterboxGeometry)> {
      let geometry = compute_geometry(frame.height(), frame.width())?;
      debug!(
        "缩放高度: {}, 上下填充高度: {}",
        geometry.scaled_height, geometry.bar_height
      );
      Ok((build_tile(&frame.image, &geometry)?, geometry))
    });
    let (tile, geometry) = tile.context("图像预处理失败")?;

    let model = self.load()?;
    let (prediction, inference) = timed(|| model.infer(&tile));
    let prediction = prediction.context("模型推理失败")?;

    let (result, postprocess_time) =
      timed(|| postprocess(&prediction, frame.height(), frame.width(), &geometry));

    Ok((
      result,
      PhaseTimings {
        preprocess,
        inference,
        postprocess: postprocess_time,
        ..Default::default()
      },
    ))
  }
}
