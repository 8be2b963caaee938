// 该文件是 Guanlan （观澜） 项目的一部分。
// src/task.rs - 检测任务
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
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  detector::ImageDetector,
  frame::{Frame, TileFrame},
  input::Capture,
  metrics::{FrameStatus, PerformanceMetrics, PhaseTimings, SharedMetrics, timed},
  model::{DetectResult, LoadModel, Model, RawPrediction},
  output::{Render, draw::Draw},
  pipeline::{FrameReader, ObjectDetector, frame_reader, object_detector},
  stage::StageError,
};

const RETRIEVE_TIMEOUT: Duration = Duration::from_secs(1);
const REPORT_INTERVAL: usize = 30;
const FORCE_EXIT_DELAY: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 单张图像：检测一次并渲染
pub struct OneShotTask;

impl<I, L, M, O, ME, LE, RE> Task<I, L, O> for OneShotTask
where
  I: Iterator<Item = Frame>,
  L: LoadModel<Model = M, Error = LE>,
  M: Model<Input = TileFrame, Output = RawPrediction, Error = ME>,
  O: Render<Frame, DetectResult, Error = RE>,
  ME: std::error::Error + Send + Sync + 'static,
  LE: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, loader: L, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，尺寸: {}x{}", frame.width(), frame.height());

    let mut detector = ImageDetector::new(loader);
    let (result, mut timings) = detector.detect(&frame)?;
    info!("检测到 {} 个物体", result.len());

    let (rendered, draw) = timed(|| output.render_result(&frame, &result));
    rendered.context("渲染失败")?;
    timings.draw = draw;

    let mut metrics = PerformanceMetrics::new();
    metrics.update(&timings);
    info!("性能分析 - {}", metrics.averages());

    Ok(())
  }
}

/// 摄像头连续检测：读帧与推理各占一个线程，调用方线程负责渲染
#[derive(Default)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop_signal: Option<Receiver<()>>,
  overlay: Option<Draw>,
}

impl ContinuousTask {
  /// 处理指定帧数后退出
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 使用外部停止信号代替 Ctrl-C
  pub fn with_stop_signal(mut self, stop_signal: Receiver<()>) -> Self {
    self.stop_signal = Some(stop_signal);
    self
  }

  /// 在每帧左上角绘制帧率与帧间隔，需要字体
  pub fn with_overlay(mut self, draw: Draw) -> Self {
    self.overlay = draw.has_font().then_some(draw);
    self
  }
}

fn install_interrupt_handler() -> anyhow::Result<Receiver<()>> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_DELAY);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理器")?;
  Ok(rx)
}

struct Report {
  frames: usize,
  window_start: Instant,
  last_frame: Instant,
  fps: f64,
  draw: SharedMetrics,
}

impl Report {
  fn new() -> Self {
    let now = Instant::now();
    Self {
      frames: 0,
      window_start: now,
      last_frame: now,
      fps: 0.0,
      draw: SharedMetrics::new(),
    }
  }

  /// 记录一帧到达，返回上一个窗口的帧率与距上一帧的间隔
  fn frame_arrived(&mut self) -> FrameStatus {
    let now = Instant::now();
    let interval = now.duration_since(self.last_frame);
    self.last_frame = now;
    FrameStatus {
      fps: self.fps,
      interval,
    }
  }

  /// `stages` 为各后台阶段的统计，每个阶段只累计自己负责的耗时
  fn frame_done(&mut self, draw: Duration, stages: &[&SharedMetrics]) {
    self.draw.update(&PhaseTimings {
      draw,
      ..Default::default()
    });
    self.frames += 1;
    if self.frames % REPORT_INTERVAL != 0 {
      return;
    }

    self.fps = REPORT_INTERVAL as f64 / self.window_start.elapsed().as_secs_f64();
    let averages = stages
      .iter()
      .fold(self.draw.averages(), |sum, metrics| sum + metrics.averages());
    info!("FPS: {:.2}, {}", self.fps, averages);

    for metrics in stages {
      metrics.reset();
    }
    self.draw.reset();
    self.window_start = Instant::now();
  }
}

impl<C, M, O, ME, RE> Task<C, M, O> for ContinuousTask
where
  C: Capture + Send + 'static,
  M: Model<Input = TileFrame, Output = RawPrediction, Error = ME> + Send + 'static,
  O: Render<Frame, DetectResult, Error = RE>,
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, capture: C, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = match self.stop_signal {
      Some(stop) => stop,
      None => install_interrupt_handler()?,
    };

    let mut reader = frame_reader(capture);
    let mut detector = object_detector(model);

    let result = reader
      .start()
      .and_then(|_| detector.start())
      .map_err(anyhow::Error::from)
      .and_then(|_| {
        drive(
          &reader,
          &detector,
          &output,
          &stop,
          self.frame_number,
          self.overlay.as_ref(),
        )
      });

    let reader_stopped = reader.stop();
    let detector_stopped = detector.stop();
    result?;
    reader_stopped.context("停止读帧阶段失败")?;
    detector_stopped.context("停止检测阶段失败")?;

    info!("任务完成，退出");
    Ok(())
  }
}

fn drive<C, M, O, ME, RE>(
  reader: &FrameReader<C>,
  detector: &ObjectDetector<M>,
  output: &O,
  stop: &Receiver<()>,
  frame_number: Option<usize>,
  overlay: Option<&Draw>,
) -> anyhow::Result<()>
where
  C: Capture + Send + 'static,
  M: Model<Input = TileFrame, Output = RawPrediction, Error = ME> + Send + 'static,
  O: Render<Frame, DetectResult, Error = RE>,
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
{
  let mut report = Report::new();
  loop {
    if stop.try_recv().is_ok() {
      warn!("中断信号接收，退出任务循环");
      return Ok(());
    }

    let letterboxed = match reader.retrieve(RETRIEVE_TIMEOUT) {
      Ok(letterboxed) => letterboxed,
      Err(StageError::Timeout) => {
        warn!("等待输入帧超时");
        continue;
      }
      Err(e) => return Err(e.into()),
    };

    detector.submit(letterboxed)?;
    let detected = match detector.retrieve(RETRIEVE_TIMEOUT) {
      Ok(detected) => detected,
      Err(StageError::Timeout) => {
        warn!("等待检测结果超时");
        continue;
      }
      Err(e) => return Err(e.into()),
    };
    let Some(mut frame) = detected.frame else {
      warn!("检测失败，跳过该帧");
      continue;
    };

    let status = report.frame_arrived();
    if let Some(draw) = overlay {
      draw.draw_status(&mut frame.image, &status);
    }

    let (rendered, draw) = timed(|| output.render_result(&frame, &detected.result));
    rendered.context("渲染失败")?;
    report.frame_done(draw, &[reader.metrics(), detector.metrics()]);

    if frame_number.is_some_and(|n| report.frames >= n) {
      info!("达到指定帧数 {}, 退出任务循环", report.frames);
      return Ok(());
    }
  }
}
