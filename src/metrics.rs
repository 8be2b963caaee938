// 该文件是 Guanlan （观澜） 项目的一部分。
// src/metrics.rs - 性能统计
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
  fmt,
  ops::Add,
  sync::{Arc, Mutex, PoisonError},
  time::{Duration, Instant},
};

/// 单帧各阶段耗时
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
  pub read: Duration,
  pub preprocess: Duration,
  pub inference: Duration,
  pub postprocess: Duration,
  pub draw: Duration,
}

impl PhaseTimings {
  pub fn total(&self) -> Duration {
    self.read + self.preprocess + self.inference + self.postprocess + self.draw
  }
}

/// 各阶段平均耗时（毫秒）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseAverages {
  pub read_ms: f64,
  pub preprocess_ms: f64,
  pub inference_ms: f64,
  pub postprocess_ms: f64,
  pub draw_ms: f64,
  pub total_ms: f64,
}

impl fmt::Display for PhaseAverages {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "读取: {:.2}ms, 预处理: {:.2}ms, 推理: {:.2}ms, 后处理: {:.2}ms, 绘制: {:.2}ms, 总计: {:.2}ms",
      self.read_ms,
      self.preprocess_ms,
      self.inference_ms,
      self.postprocess_ms,
      self.draw_ms,
      self.total_ms
    )
  }
}

/// 不同阶段各自统计的平均值相加即为整条流水线的平均值
impl Add for PhaseAverages {
  type Output = PhaseAverages;

  fn add(self, rhs: Self) -> Self::Output {
    PhaseAverages {
      read_ms: self.read_ms + rhs.read_ms,
      preprocess_ms: self.preprocess_ms + rhs.preprocess_ms,
      inference_ms: self.inference_ms + rhs.inference_ms,
      postprocess_ms: self.postprocess_ms + rhs.postprocess_ms,
      draw_ms: self.draw_ms + rhs.draw_ms,
      total_ms: self.total_ms + rhs.total_ms,
    }
  }
}

/// 显示帧的状态：最近一个统计窗口的帧率与相邻两帧的间隔
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStatus {
  pub fps: f64,
  pub interval: Duration,
}

/// 累计耗时与帧计数
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
  sums: PhaseTimings,
  frame_count: u64,
}

impl PerformanceMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// 累加一帧
  pub fn update(&mut self, timings: &PhaseTimings) {
    self.sums.read += timings.read;
    self.sums.preprocess += timings.preprocess;
    self.sums.inference += timings.inference;
    self.sums.postprocess += timings.postprocess;
    self.sums.draw += timings.draw;
    self.frame_count += 1;
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  /// 尚未累计任何帧时全部为零
  pub fn averages(&self) -> PhaseAverages {
    if self.frame_count == 0 {
      return PhaseAverages::default();
    }
    let count = self.frame_count as f64;
    let avg = |d: Duration| d.as_secs_f64() * 1000.0 / count;
    PhaseAverages {
      read_ms: avg(self.sums.read),
      preprocess_ms: avg(self.sums.preprocess),
      inference_ms: avg(self.sums.inference),
      postprocess_ms: avg(self.sums.postprocess),
      draw_ms: avg(self.sums.draw),
      total_ms: avg(self.sums.total()),
    }
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }
}

/// 线程间共享的统计，每个阶段各持有一份
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics(Arc<Mutex<PerformanceMetrics>>);

impl SharedMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&self, timings: &PhaseTimings) {
    self.with(|metrics| metrics.update(timings));
  }

  pub fn averages(&self) -> PhaseAverages {
    self.with(|metrics| metrics.averages())
  }

  pub fn frame_count(&self) -> u64 {
    self.with(|metrics| metrics.frame_count())
  }

  pub fn reset(&self) {
    self.with(PerformanceMetrics::reset);
  }

  fn with<R>(&self, f: impl FnOnce(&mut PerformanceMetrics) -> R) -> R {
    let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
  }
}

/// 计时执行闭包
pub fn timed<R>(f: impl FnOnce() -> R) -> (R, Duration) {
  let now = Instant::now();
  let result = f();
  (result, now.elapsed())
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
  }

  #[test]
  fn total_sums_all_phases() {
    let timings = PhaseTimings {
      read: ms(1),
      preprocess: ms(2),
      inference: ms(3),
      postprocess: ms(4),
      draw: ms(5),
    };
    assert_eq!(timings.total(), ms(15));
  }

  #[test]
  fn averages_in_milliseconds() {
    let mut metrics = PerformanceMetrics::new();
    metrics.update(&PhaseTimings {
      inference: ms(10),
      postprocess: ms(2),
      ..Default::default()
    });
    metrics.update(&PhaseTimings {
      inference: ms(30),
      draw: ms(4),
      ..Default::default()
    });

    let averages = metrics.averages();
    assert_eq!(metrics.frame_count(), 2);
    assert_abs_diff_eq!(averages.inference_ms, 20.0, epsilon = 1e-9);
    assert_abs_diff_eq!(averages.postprocess_ms, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(averages.draw_ms, 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(averages.read_ms, 0.0);
    assert_abs_diff_eq!(averages.total_ms, 23.0, epsilon = 1e-9);
  }

  #[test]
  fn empty_metrics_average_to_zero() {
    assert_eq!(PerformanceMetrics::new().averages(), PhaseAverages::default());
  }

  #[test]
  fn shared_metrics_reset_across_clones() {
    let shared = SharedMetrics::new();
    let other = shared.clone();
    other.update(&PhaseTimings {
      read: ms(8),
      ..Default::default()
    });
    assert_eq!(shared.frame_count(), 1);
    assert_abs_diff_eq!(shared.averages().read_ms, 8.0, epsilon = 1e-9);

    shared.reset();
    assert_eq!(other.frame_count(), 0);
  }

  #[test]
  fn stage_averages_combine() {
    let reader = SharedMetrics::new();
    let detector = SharedMetrics::new();
    reader.update(&PhaseTimings {
      read: ms(4),
      preprocess: ms(2),
      ..Default::default()
    });
    detector.update(&PhaseTimings {
      inference: ms(10),
      ..Default::default()
    });

    let combined = reader.averages() + detector.averages();
    assert_abs_diff_eq!(combined.total_ms, 16.0, epsilon = 1e-9);
    assert_abs_diff_eq!(combined.inference_ms, 10.0, epsilon = 1e-9);
  }
}
