// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/rknn.rs - RKNN 打包模型
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

use std::path::{Path, PathBuf};

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::TileFrame,
  input::AsNhwcFrame,
  model::{Model, PredictionError, RawPrediction},
  url_file_path,
};

const RKNN_NUM_INPUTS: u32 = 1;
// 坐标 [N, 4] 与置信度 [N, C]
const RKNN_NUM_OUTPUTS: u32 = 2;
const RKNN_COORDINATES_OUTPUT: usize = 0;
const RKNN_CONFIDENCE_OUTPUT: usize = 1;

#[derive(Error, Debug)]
pub enum RknnModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型输出错误: {0}")]
  PredictionError(#[from] PredictionError),
}

impl From<std::io::Error> for RknnModelError {
  fn from(err: std::io::Error) -> Self {
    RknnModelError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnModelError {
  fn from(err: rknpu::Error) -> Self {
    RknnModelError::RknnError(err)
  }
}

impl RknnModelError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnModelError::ModelInvalid(msg.to_string(), e)
  }
}

/// 模型的输入输出概要
#[derive(Debug, Clone, Default)]
pub struct ModelDescription {
  pub api_version: Option<String>,
  pub driver_version: Option<String>,
  pub num_inputs: u32,
  pub num_outputs: u32,
}

pub struct RknnModel {
  context: Context,
  description: ModelDescription,
}

#[derive(Debug, Clone)]
pub struct RknnModelBuilder {
  model_path: PathBuf,
}

impl FromUrlWithScheme for RknnModelBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnModelBuilder {
  type Error = RknnModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(RknnModelBuilder::new(url_file_path(url)))
  }
}

impl RknnModelBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
    }
  }

  pub fn build(&self) -> Result<RknnModel, RknnModelError> {
    if !self.model_path.is_file() {
      return Err(RknnModelError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    let mut description = ModelDescription::default();
    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
          description.api_version = Some(api_ver.to_string());
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
          description.driver_version = Some(drv_ver.to_string());
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnModelError::invalid("无法查询 SDK 版本", e));
      }
    }

    description.num_inputs = context
      .num_inputs()
      .map_err(|e| RknnModelError::invalid("无法获取输入数量", e))?;
    description.num_outputs = context
      .num_outputs()
      .map_err(|e| RknnModelError::invalid("无法获取输出数量", e))?;

    if description.num_inputs != RKNN_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, description.num_inputs
      );
      error!("{}", msg);
      return Err(RknnModelError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    if description.num_outputs != RKNN_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输出数量为 {}, 实际为 {}",
        RKNN_NUM_OUTPUTS, description.num_outputs
      );
      error!("{}", msg);
      return Err(RknnModelError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    Ok(RknnModel {
      context,
      description,
    })
  }
}

impl RknnModel {
  pub fn description(&self) -> &ModelDescription {
    &self.description
  }
}

impl Model for RknnModel {
  type Input = TileFrame;
  type Output = RawPrediction;
  type Error = RknnModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    self
      .context
      .set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let coordinates = output.get_f32(RKNN_COORDINATES_OUTPUT)?;
    let confidence = output.get_f32(RKNN_CONFIDENCE_OUTPUT)?;
    debug!(
      "坐标输出长度: {}, 置信度输出长度: {}",
      coordinates.len(),
      confidence.len()
    );

    Ok(RawPrediction::from_flat(&coordinates[..], &confidence[..])?)
  }
}
