// 该文件是 Guanlan （观澜） 项目的一部分。
// src/pipeline.rs - 读帧与检测工作者
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

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::{Frame, TileFrame},
  input::Capture,
  letterbox::{LetterboxError, LetterboxedFrame},
  metrics::{PhaseTimings, SharedMetrics, timed},
  model::{DetectResult, Model, RawPrediction},
  postprocess::postprocess,
  stage::{Stage, Worker},
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("读取帧失败: {0}")]
  Capture(BoxedError),
  #[error("未读取到帧")]
  EmptyRead,
  #[error("预处理失败: {0}")]
  Letterbox(#[from] LetterboxError),
  #[error("推理失败: {0}")]
  Inference(BoxedError),
  #[error("资源已释放")]
  Released,
}

/// 读帧并完成信箱变换
pub struct FrameReaderWorker<C> {
  capture: C,
  next_index: u64,
  started: Instant,
}

impl<C: Capture> FrameReaderWorker<C> {
  pub fn new(capture: C) -> Self {
    Self {
      capture,
      next_index: 0,
      started: Instant::now(),
    }
  }
}

impl<C: Capture + Send + 'static> Worker for FrameReaderWorker<C> {
  type Input = ();
  type Output = LetterboxedFrame;
  type Error = PipelineError;

  fn is_idle(error: &PipelineError) -> bool {
    matches!(error, PipelineError::EmptyRead)
  }

  fn work(
    &mut self,
    _input: (),
    metrics: &SharedMetrics,
  ) -> Result<LetterboxedFrame, PipelineError> {
    let (image, read) = timed(|| self.capture.read_frame());
    let image = image
      .map_err(|e| PipelineError::Capture(Box::new(e)))?
      .ok_or(PipelineError::EmptyRead)?;

    let frame = Frame::new(
      image,
      self.next_index,
      self.started.elapsed().as_millis() as u64,
    );
    self.next_index += 1;

    let (letterboxed, preprocess) = timed(|| LetterboxedFrame::new(frame));
    let letterboxed = letterboxed?;
    metrics.update(&PhaseTimings {
      read,
      preprocess,
      ..Default::default()
    });
    debug!(
      "读取第 {} 帧，读取耗时: {:.2?}, 预处理耗时: {:.2?}",
      letterboxed.frame.index, read, preprocess
    );
    Ok(letterboxed)
  }

  fn release(&mut self) {
    info!("释放采集设备");
    self.capture.release();
  }
}

/// 检测阶段的输出，失败时 `frame` 为空
#[derive(Debug, Clone, Default)]
pub struct DetectorOutput {
  pub frame: Option<Frame>,
  pub result: DetectResult,
}

impl DetectorOutput {
  pub fn empty() -> Self {
    Self::default()
  }
}

/// 推理并后处理
pub struct DetectorWorker<M> {
  model: Option<M>,
}

impl<M> DetectorWorker<M> {
  pub fn new(model: M) -> Self {
    Self { model: Some(model) }
  }
}

impl<M, E> Worker for DetectorWorker<M>
where
  M: Model<Input = TileFrame, Output = RawPrediction, Error = E> + Send + 'static,
  E: std::error::Error + Send + Sync + 'static,
{
  type Input = LetterboxedFrame;
  type Output = DetectorOutput;
  type Error = PipelineError;

  fn work(
    &mut self,
    input: LetterboxedFrame,
    metrics: &SharedMetrics,
  ) -> Result<DetectorOutput, PipelineError> {
    let model = self.model.as_ref().ok_or(PipelineError::Released)?;

    let (prediction, inference) = timed(|| model.infer(&input.tile));
    let prediction = prediction.map_err(|e| PipelineError::Inference(Box::new(e)))?;

    let LetterboxedFrame {
      frame, geometry, ..
    } = input;
    let (result, postprocess_time) =
      timed(|| postprocess(&prediction, frame.height(), frame.width(), &geometry));

    metrics.update(&PhaseTimings {
      inference,
      postprocess: postprocess_time,
      ..Default::default()
    });
    debug!(
      "第 {} 帧检测到 {} 个物体，推理耗时: {:.2?}, 后处理耗时: {:.2?}",
      frame.index,
      result.len(),
      inference,
      postprocess_time
    );

    Ok(DetectorOutput {
      frame: Some(frame),
      result,
    })
  }

  fn fallback(&self) -> Option<DetectorOutput> {
    Some(DetectorOutput::empty())
  }

  fn release(&mut self) {
    if self.model.take().is_some() {
      info!("释放模型");
    }
  }
}

pub type FrameReader<C> = Stage<FrameReaderWorker<C>>;
pub type ObjectDetector<M> = Stage<DetectorWorker<M>>;

/// 读帧阶段，没有输入
pub fn frame_reader<C: Capture + Send + 'static>(capture: C) -> FrameReader<C> {
  Stage::producer("frame-reader", FrameReaderWorker::new(capture))
}

/// 检测阶段，由调用方提交信箱变换后的帧
pub fn object_detector<M, E>(model: M) -> ObjectDetector<M>
where
  M: Model<Input = TileFrame, Output = RawPrediction, Error = E> + Send + 'static,
  E: std::error::Error + Send + Sync + 'static,
{
  Stage::consumer("object-detector", DetectorWorker::new(model))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::letterbox::NormalizedBox;
  use approx::assert_abs_diff_eq;
  use image::RgbImage;
  use std::{
    convert::Infallible,
    sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
    },
  };

  struct Blank {
    remaining: usize,
    released: Arc<AtomicBool>,
  }

  impl Capture for Blank {
    type Error = Infallible;

    fn read_frame(&mut self) -> Result<Option<RgbImage>, Infallible> {
      if self.remaining == 0 {
        return Ok(None);
      }
      self.remaining -= 1;
      Ok(Some(RgbImage::new(1280, 720)))
    }

    fn release(&mut self) {
      self.released.store(true, Ordering::Release);
    }
  }

  #[derive(Debug, Error)]
  #[error("模型故障")]
  struct Broken;

  struct FixedModel {
    fail: bool,
  }

  impl Model for FixedModel {
    type Input = TileFrame;
    type Output = RawPrediction;
    type Error = Broken;

    fn infer(&self, _input: &TileFrame) -> Result<RawPrediction, Broken> {
      if self.fail {
        return Err(Broken);
      }
      Ok(
        RawPrediction::new(
          vec![NormalizedBox::from([0.5, 0.5, 0.2, 0.1])],
          vec![vec![0.2, 0.7]],
        )
        .unwrap(),
      )
    }
  }

  #[test]
  fn reader_letterboxes_and_counts_frames() {
    let released = Arc::new(AtomicBool::new(false));
    let mut worker = FrameReaderWorker::new(Blank {
      remaining: 2,
      released: Arc::clone(&released),
    });
    let metrics = SharedMetrics::new();

    let first = worker.work((), &metrics).unwrap();
    let second = worker.work((), &metrics).unwrap();
    assert_eq!(first.geometry.bar_height, 140);
    assert_eq!((first.frame.index, second.frame.index), (0, 1));
    assert_eq!(metrics.frame_count(), 2);

    assert!(matches!(
      worker.work((), &metrics),
      Err(PipelineError::EmptyRead)
    ));
    assert_eq!(metrics.frame_count(), 2);
    assert!(FrameReaderWorker::<Blank>::is_idle(&PipelineError::EmptyRead));
    assert!(!FrameReaderWorker::<Blank>::is_idle(&PipelineError::Released));

    worker.release();
    assert!(released.load(Ordering::Acquire));
  }

  #[test]
  fn detector_maps_back_to_frame() {
    let frame = Frame::new(RgbImage::new(1280, 720), 9, 0);
    let letterboxed = LetterboxedFrame::new(frame).unwrap();
    let mut worker = DetectorWorker::new(FixedModel { fail: false });
    let metrics = SharedMetrics::new();

    let output = worker.work(letterboxed, &metrics).unwrap();
    assert_eq!(output.frame.map(|f| f.index), Some(9));
    assert_eq!(output.result.len(), 1);
    assert_eq!(output.result.items[0].class_id, 1);
    let [x0, y0] = output.result.items[0].top_left();
    assert_abs_diff_eq!(x0, 512.0, epsilon = 1e-3);
    assert_abs_diff_eq!(y0, 296.0, epsilon = 1e-3);
    assert_eq!(metrics.frame_count(), 1);
  }

  #[test]
  fn detector_failure_falls_back_to_empty_output() {
    let frame = Frame::new(RgbImage::new(64, 48), 0, 0);
    let letterboxed = LetterboxedFrame::new(frame).unwrap();
    let mut worker = DetectorWorker::new(FixedModel { fail: true });

    assert!(matches!(
      worker.work(letterboxed.clone(), &SharedMetrics::new()),
      Err(PipelineError::Inference(_))
    ));
    let fallback = worker.fallback().unwrap();
    assert!(fallback.frame.is_none() && fallback.result.is_empty());

    worker.release();
    assert!(matches!(
      worker.work(letterboxed, &SharedMetrics::new()),
      Err(PipelineError::Released)
    ));
  }
}
