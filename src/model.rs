// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model.rs - 模型
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

use std::path::Path;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::TileFrame, letterbox::NormalizedBox};

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::{ModelDescription, RknnModel, RknnModelBuilder, RknnModelError};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 模型加载器，单图检测时在首次使用才调用
pub trait LoadModel {
  type Model: Model;
  type Error;

  fn load(&self) -> Result<Self::Model, Self::Error>;
}

impl<M: Model, E, F: Fn() -> Result<M, E>> LoadModel for F {
  type Model = M;
  type Error = E;

  fn load(&self) -> Result<Self::Model, Self::Error> {
    self()
  }
}

#[derive(Error, Debug)]
pub enum PredictionError {
  #[error("检测框数量 {boxes} 与置信度数量 {confidences} 不一致")]
  LengthMismatch { boxes: usize, confidences: usize },
  #[error("第 {0} 个检测的置信度向量为空")]
  EmptyClassVector(usize),
  #[error("坐标输出长度 {0} 不是 4 的倍数")]
  MalformedCoordinates(usize),
  #[error("置信度输出长度 {len} 无法按 {detections} 个检测划分")]
  MalformedConfidence { len: usize, detections: usize },
}

/// 模型原始输出，第 i 个框与第 i 个置信度向量对应
#[derive(Debug, Clone, Default)]
pub struct RawPrediction {
  boxes: Vec<NormalizedBox>,
  confidences: Vec<Vec<f32>>,
}

impl RawPrediction {
  pub fn new(
    boxes: Vec<NormalizedBox>,
    confidences: Vec<Vec<f32>>,
  ) -> Result<Self, PredictionError> {
    if boxes.len() != confidences.len() {
      return Err(PredictionError::LengthMismatch {
        boxes: boxes.len(),
        confidences: confidences.len(),
      });
    }
    if let Some(idx) = confidences.iter().position(Vec::is_empty) {
      return Err(PredictionError::EmptyClassVector(idx));
    }
    Ok(Self { boxes, confidences })
  }

  pub fn empty() -> Self {
    Self::default()
  }

  /// 由扁平张量构造：坐标 `[N, 4]`，置信度 `[N, C]`
  pub fn from_flat(coordinates: &[f32], confidence: &[f32]) -> Result<Self, PredictionError> {
    if coordinates.len() % 4 != 0 {
      return Err(PredictionError::MalformedCoordinates(coordinates.len()));
    }
    let detections = coordinates.len() / 4;
    if detections == 0 {
      return Ok(Self::empty());
    }
    if confidence.is_empty() || confidence.len() % detections != 0 {
      return Err(PredictionError::MalformedConfidence {
        len: confidence.len(),
        detections,
      });
    }
    let classes = confidence.len() / detections;

    let boxes = coordinates
      .chunks_exact(4)
      .map(|c| NormalizedBox::from([c[0], c[1], c[2], c[3]]))
      .collect();
    let confidences = confidence
      .chunks_exact(classes)
      .map(<[f32]>::to_vec)
      .collect();
    Self::new(boxes, confidences)
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&NormalizedBox, &[f32])> {
    self
      .boxes
      .iter()
      .zip(self.confidences.iter().map(Vec::as_slice))
  }
}

/// 单个检测结果，角点为原图像素坐标
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: usize,
  pub confidence: f32,
  pub corners: [[f32; 2]; 4], // [左上, 右上, 左下, 右下]
}

impl DetectItem {
  pub fn top_left(&self) -> [f32; 2] {
    self.corners[0]
  }

  pub fn bottom_right(&self) -> [f32; 2] {
    self.corners[3]
  }
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  NotFound(String),
  #[error("不支持的模型: {0}")]
  Unsupported(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("模型输出格式错误: {0}")]
  PredictionError(#[from] PredictionError),
  #[cfg(feature = "rknpu")]
  #[error("RKNN 模型错误: {0}")]
  RknnModelError(#[from] RknnModelError),
}

/// 按 URL 或文件扩展名选择的模型构建器
pub enum ModelWrapperBuilder {
  #[cfg(feature = "rknpu")]
  Rknn(RknnModelBuilder),
}

pub enum ModelWrapper {
  #[cfg(feature = "rknpu")]
  Rknn(RknnModel),
}

impl FromUrl for ModelWrapperBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "rknpu")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnModelBuilder::SCHEME {
        return Ok(ModelWrapperBuilder::Rknn(RknnModelBuilder::from_url(url)?));
      }
    }
    let _ = url;
    Err(ModelError::SchemeMismatch)
  }
}

impl ModelWrapperBuilder {
  /// 接受 `rknn:///path` 形式的 URL 或普通文件路径
  pub fn from_location(location: &str) -> Result<Self, ModelError> {
    match Url::parse(location) {
      Ok(url) if url.scheme().len() > 1 => Self::from_url(&url),
      _ => Self::from_path(location),
    }
  }

  /// 根据扩展名选择运行时
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    if !path.exists() {
      return Err(ModelError::NotFound(path.display().to_string()));
    }

    let extension = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(str::to_ascii_lowercase)
      .unwrap_or_default();
    match extension.as_str() {
      #[cfg(feature = "rknpu")]
      "rknn" => Ok(ModelWrapperBuilder::Rknn(RknnModelBuilder::new(path))),
      _ => Err(ModelError::Unsupported(format!(
        "{} (未启用对应的运行时特性)",
        path.display()
      ))),
    }
  }
}

impl LoadModel for ModelWrapperBuilder {
  type Model = ModelWrapper;
  type Error = ModelError;

  fn load(&self) -> Result<Self::Model, Self::Error> {
    match *self {
      #[cfg(feature = "rknpu")]
      ModelWrapperBuilder::Rknn(ref builder) => Ok(ModelWrapper::Rknn(builder.build()?)),
    }
  }
}

impl Model for ModelWrapper {
  type Input = TileFrame;
  type Output = RawPrediction;
  type Error = ModelError;

  #[allow(unused_variables)]
  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match *self {
      #[cfg(feature = "rknpu")]
      ModelWrapper::Rknn(ref model) => Ok(model.infer(input)?),
    }
  }
}
