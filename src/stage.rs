// 该文件是 Guanlan （观澜） 项目的一部分。
// src/stage.rs - 后台流水线阶段
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

//! # 流水线阶段
//!
//! 每个 [`Stage`] 在独立线程中反复调用 [`Worker::work`]，输入与输出各通过一个
//! [`Mailbox`] 交接，二者都只保留最新值。
//!
//! 生命周期：`Created → Running → Stopping → Stopped`。
//!
//! 每次 [`Stage::submit`] 分配一个递增的序号并随输入一起传递，工作线程的输出
//! 沿用该序号；[`Stage::retrieve`] 丢弃序号早于最近一次提交的输出，因此调用方
//! 永远不会拿到过期结果。

use std::{
  fmt,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  mailbox::{Mailbox, MailboxError},
  metrics::SharedMetrics,
};

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum StageError {
  #[error("阶段 {0} 已经启动过")]
  AlreadyStarted(String),
  #[error("阶段 {0} 不接受输入")]
  NoInput(String),
  #[error("等待阶段输出超时")]
  Timeout,
  #[error("阶段 {0} 已关闭")]
  Closed(String),
  #[error("无法创建工作线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("阶段 {0} 的工作线程异常退出")]
  WorkerPanicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
  Created,
  Running,
  Stopping,
  Stopped,
}

/// 阶段中实际执行的工作
pub trait Worker: Send + 'static {
  type Input: Send + 'static;
  type Output: Send + 'static;
  type Error: fmt::Display;

  fn work(&mut self, input: Self::Input, metrics: &SharedMetrics)
  -> Result<Self::Output, Self::Error>;

  /// `work` 失败时发布的结果
  fn fallback(&self) -> Option<Self::Output> {
    None
  }

  /// 本轮没有产出的失败，只记录调试日志，不发布回退结果
  fn is_idle(error: &Self::Error) -> bool {
    let _ = error;
    false
  }

  /// 线程结束后释放底层资源
  fn release(&mut self) {}
}

type Feed<T> = Box<dyn FnMut() -> Option<(u64, T)> + Send>;

pub struct Stage<W: Worker> {
  name: String,
  accepts_input: bool,
  state: StageState,
  running: Arc<AtomicBool>,
  sequence: AtomicU64,
  input: Arc<Mailbox<(u64, W::Input)>>,
  output: Arc<Mailbox<(u64, W::Output)>>,
  metrics: SharedMetrics,
  worker: Option<W>,
  feed: Option<Feed<W::Input>>,
  handle: Option<JoinHandle<W>>,
}

impl<W: Worker<Input = ()>> Stage<W> {
  /// 没有输入的阶段，线程持续产出
  pub fn producer(name: impl Into<String>, worker: W) -> Self {
    let feed: Feed<()> = Box::new(|| Some((0, ())));
    Self::with_feed(name.into(), worker, false, |_| feed)
  }
}

impl<W: Worker> Stage<W> {
  /// 由 [`Stage::submit`] 驱动的阶段
  pub fn consumer(name: impl Into<String>, worker: W) -> Self {
    Self::with_feed(name.into(), worker, true, |input| {
      Box::new(move || input.recv_timeout(INPUT_POLL_INTERVAL).ok())
    })
  }

  fn with_feed(
    name: String,
    worker: W,
    accepts_input: bool,
    make_feed: impl FnOnce(Arc<Mailbox<(u64, W::Input)>>) -> Feed<W::Input>,
  ) -> Self {
    let input = Arc::new(Mailbox::new());
    let feed = make_feed(Arc::clone(&input));
    Self {
      name,
      accepts_input,
      state: StageState::Created,
      running: Arc::new(AtomicBool::new(false)),
      sequence: AtomicU64::new(0),
      input,
      output: Arc::new(Mailbox::new()),
      metrics: SharedMetrics::new(),
      worker: Some(worker),
      feed: Some(feed),
      handle: None,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn state(&self) -> StageState {
    self.state
  }

  pub fn metrics(&self) -> &SharedMetrics {
    &self.metrics
  }

  pub fn start(&mut self) -> Result<(), StageError> {
    if self.state != StageState::Created {
      return Err(StageError::AlreadyStarted(self.name.clone()));
    }
    let (Some(worker), Some(feed)) = (self.worker.take(), self.feed.take()) else {
      return Err(StageError::AlreadyStarted(self.name.clone()));
    };

    self.running.store(true, Ordering::Release);
    let context = WorkerContext {
      name: self.name.clone(),
      running: Arc::clone(&self.running),
      output: Arc::clone(&self.output),
      metrics: self.metrics.clone(),
    };

    let handle = thread::Builder::new()
      .name(self.name.clone())
      .spawn(move || context.run(worker, feed));
    match handle {
      Ok(handle) => {
        info!("阶段 {} 已启动", self.name);
        self.handle = Some(handle);
        self.state = StageState::Running;
        Ok(())
      }
      Err(e) => {
        self.running.store(false, Ordering::Release);
        self.state = StageState::Stopped;
        Err(StageError::Spawn(e))
      }
    }
  }

  /// 提交新输入，未被处理的旧输入与未取走的旧输出一并丢弃
  pub fn submit(&self, item: W::Input) -> Result<(), StageError> {
    if !self.accepts_input {
      return Err(StageError::NoInput(self.name.clone()));
    }
    if self.input.take().is_some() {
      debug!("阶段 {} 丢弃未处理的输入", self.name);
    }
    if self.output.take().is_some() {
      debug!("阶段 {} 丢弃未取走的输出", self.name);
    }
    let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
    self.input.put((sequence, item));
    Ok(())
  }

  /// 等待不早于最近一次提交的输出
  pub fn retrieve(&self, timeout: Duration) -> Result<W::Output, StageError> {
    let deadline = Instant::now() + timeout;
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match self.output.recv_timeout(remaining) {
        Ok((sequence, output)) if self.is_current(sequence) => return Ok(output),
        Ok((sequence, _)) => debug!("阶段 {} 丢弃过期输出 #{}", self.name, sequence),
        Err(MailboxError::Timeout) => return Err(StageError::Timeout),
        Err(MailboxError::Closed) => return Err(StageError::Closed(self.name.clone())),
      }
    }
  }

  /// 非阻塞地取出当前输出
  pub fn poll(&self) -> Option<W::Output> {
    match self.output.take() {
      Some((sequence, output)) if self.is_current(sequence) => Some(output),
      _ => None,
    }
  }

  fn is_current(&self, sequence: u64) -> bool {
    sequence >= self.sequence.load(Ordering::Acquire)
  }

  /// 停止线程并释放资源
  pub fn stop(mut self) -> Result<(), StageError> {
    self.shutdown()
  }

  fn shutdown(&mut self) -> Result<(), StageError> {
    match self.state {
      StageState::Stopped | StageState::Stopping => return Ok(()),
      StageState::Created => {
        if let Some(mut worker) = self.worker.take() {
          worker.release();
        }
        self.state = StageState::Stopped;
        return Ok(());
      }
      StageState::Running => {}
    }

    info!("停止阶段 {}", self.name);
    self.state = StageState::Stopping;
    self.running.store(false, Ordering::Release);
    self.input.close();

    let result = match self.handle.take().map(JoinHandle::join) {
      Some(Ok(mut worker)) => {
        worker.release();
        info!("阶段 {} 已停止", self.name);
        Ok(())
      }
      Some(Err(_)) => Err(StageError::WorkerPanicked(self.name.clone())),
      None => Ok(()),
    };
    self.state = StageState::Stopped;
    result
  }
}

impl<W: Worker> Drop for Stage<W> {
  fn drop(&mut self) {
    if let Err(e) = self.shutdown() {
      warn!("阶段 {} 停止失败: {}", self.name, e);
    }
  }
}

struct WorkerContext<O> {
  name: String,
  running: Arc<AtomicBool>,
  output: Arc<Mailbox<(u64, O)>>,
  metrics: SharedMetrics,
}

impl<O: Send + 'static> WorkerContext<O> {
  fn run<W: Worker<Output = O>>(self, mut worker: W, mut feed: Feed<W::Input>) -> W {
    debug!("阶段 {} 工作线程开始", self.name);
    while self.running.load(Ordering::Acquire) {
      let Some((sequence, input)) = feed() else {
        continue;
      };
      match worker.work(input, &self.metrics) {
        Ok(output) => {
          self.output.put((sequence, output));
        }
        Err(e) if W::is_idle(&e) => {
          debug!("阶段 {} 本轮无输出: {}", self.name, e);
        }
        Err(e) => {
          error!("阶段 {} 处理失败: {}", self.name, e);
          if let Some(output) = worker.fallback() {
            self.output.put((sequence, output));
          }
        }
      }
    }
    debug!("阶段 {} 工作线程退出", self.name);
    worker
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  const IDLE: &str = "空输入";

  struct Doubler {
    released: Arc<AtomicBool>,
  }

  impl Worker for Doubler {
    type Input = i32;
    type Output = i32;
    type Error = String;

    fn work(&mut self, input: i32, _metrics: &SharedMetrics) -> Result<i32, String> {
      if input < 0 {
        return Err(format!("负数输入: {}", input));
      }
      if input == 0 {
        return Err(IDLE.to_string());
      }
      Ok(input * 2)
    }

    fn fallback(&self) -> Option<i32> {
      Some(-1)
    }

    fn is_idle(error: &String) -> bool {
      error == IDLE
    }

    fn release(&mut self) {
      self.released.store(true, Ordering::Release);
    }
  }

  struct Counter(u32);

  impl Worker for Counter {
    type Input = ();
    type Output = u32;
    type Error = String;

    fn work(&mut self, _input: (), _metrics: &SharedMetrics) -> Result<u32, String> {
      self.0 += 1;
      thread::sleep(Duration::from_millis(1));
      Ok(self.0)
    }
  }

  fn doubler() -> (Stage<Doubler>, Arc<AtomicBool>) {
    let released = Arc::new(AtomicBool::new(false));
    let stage = Stage::consumer(
      "doubler",
      Doubler {
        released: Arc::clone(&released),
      },
    );
    (stage, released)
  }

  #[test]
  fn consumer_processes_submissions() {
    let (mut stage, released) = doubler();
    stage.start().unwrap();
    assert_eq!(stage.state(), StageState::Running);

    stage.submit(21).unwrap();
    assert_eq!(stage.retrieve(Duration::from_secs(5)).unwrap(), 42);

    stage.stop().unwrap();
    assert!(released.load(Ordering::Acquire));
  }

  #[test]
  fn failed_work_publishes_fallback() {
    let (mut stage, _) = doubler();
    stage.start().unwrap();
    stage.submit(-3).unwrap();
    assert_eq!(stage.retrieve(Duration::from_secs(5)).unwrap(), -1);
    stage.submit(4).unwrap();
    assert_eq!(stage.retrieve(Duration::from_secs(5)).unwrap(), 8);
  }

  #[test]
  fn idle_work_publishes_nothing() {
    let (mut stage, _) = doubler();
    stage.start().unwrap();
    stage.submit(0).unwrap();
    assert!(matches!(
      stage.retrieve(Duration::from_millis(100)),
      Err(StageError::Timeout)
    ));
    stage.submit(5).unwrap();
    assert_eq!(stage.retrieve(Duration::from_secs(5)).unwrap(), 10);
  }

  #[test]
  fn retrieve_times_out_without_input() {
    let (mut stage, _) = doubler();
    stage.start().unwrap();
    assert!(matches!(
      stage.retrieve(Duration::from_millis(50)),
      Err(StageError::Timeout)
    ));
    assert!(stage.poll().is_none());
  }

  #[test]
  fn start_twice_is_rejected() {
    let (mut stage, _) = doubler();
    stage.start().unwrap();
    assert!(matches!(stage.start(), Err(StageError::AlreadyStarted(_))));
  }

  #[test]
  fn producer_runs_without_input() {
    let mut stage = Stage::producer("counter", Counter(0));
    assert!(matches!(stage.submit(()), Err(StageError::NoInput(_))));

    stage.start().unwrap();
    let first = stage.retrieve(Duration::from_secs(5)).unwrap();
    let second = stage.retrieve(Duration::from_secs(5)).unwrap();
    assert!(second > first);
    stage.stop().unwrap();
  }

  #[test]
  fn stopping_unstarted_stage_releases_worker() {
    let (stage, released) = doubler();
    stage.stop().unwrap();
    assert!(released.load(Ordering::Acquire));
  }

  #[test]
  fn drop_joins_running_stage() {
    let (mut stage, released) = doubler();
    stage.start().unwrap();
    drop(stage);
    assert!(released.load(Ordering::Acquire));
  }

  struct Gated {
    gate: Arc<(Mutex<bool>, std::sync::Condvar)>,
    busy: Arc<AtomicBool>,
    seen: Arc<Mutex<Vec<u32>>>,
  }

  impl Worker for Gated {
    type Input = u32;
    type Output = u32;
    type Error = String;

    fn work(&mut self, input: u32, _metrics: &SharedMetrics) -> Result<u32, String> {
      self.seen.lock().unwrap().push(input);
      self.busy.store(true, Ordering::Release);
      let (lock, cvar) = &*self.gate;
      let open = lock.lock().unwrap();
      let _open = cvar.wait_while(open, |open| !*open).unwrap();
      Ok(input)
    }
  }

  #[test]
  fn quick_submissions_keep_only_latest() {
    let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
    let busy = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut stage = Stage::consumer(
      "gated",
      Gated {
        gate: Arc::clone(&gate),
        busy: Arc::clone(&busy),
        seen: Arc::clone(&seen),
      },
    );
    stage.start().unwrap();

    stage.submit(0).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !busy.load(Ordering::Acquire) {
      assert!(Instant::now() < deadline, "工作线程未开始处理");
      thread::sleep(Duration::from_millis(1));
    }
    stage.submit(1).unwrap();
    stage.submit(2).unwrap();

    {
      let (lock, cvar) = &*gate;
      *lock.lock().unwrap() = true;
      cvar.notify_all();
    }

    assert_eq!(stage.retrieve(Duration::from_secs(5)).unwrap(), 2);
    stage.stop().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0, 2]);
  }
}
