// 该文件是 Guanlan （观澜） 项目的一部分。
// src/mailbox.rs - 单槽信箱
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

//! 只保留最新值的单槽信箱。
//!
//! 写入总是成功，若槽中已有旧值则被挤出并返回给调用者；读取可以非阻塞
//! ([`Mailbox::take`]) 或带超时阻塞 ([`Mailbox::recv_timeout`])。关闭后所有
//! 等待者立即返回 [`MailboxError::Closed`]，槽中残留的值不再交付。

use std::{
  sync::{Condvar, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
  #[error("信箱已关闭")]
  Closed,
  #[error("等待超时")]
  Timeout,
}

#[derive(Debug)]
struct Slot<T> {
  value: Option<T>,
  closed: bool,
}

#[derive(Debug)]
pub struct Mailbox<T> {
  slot: Mutex<Slot<T>>,
  ready: Condvar,
}

impl<T> Default for Mailbox<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Mailbox<T> {
  pub fn new() -> Self {
    Self {
      slot: Mutex::new(Slot {
        value: None,
        closed: false,
      }),
      ready: Condvar::new(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Slot<T>> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 写入新值，返回被挤出的旧值
  pub fn put(&self, value: T) -> Option<T> {
    let evicted = self.lock().value.replace(value);
    self.ready.notify_one();
    evicted
  }

  /// 非阻塞取出
  pub fn take(&self) -> Option<T> {
    self.lock().value.take()
  }

  pub fn close(&self) {
    self.lock().closed = true;
    self.ready.notify_all();
  }

  /// 阻塞直到有值或被关闭
  pub fn recv(&self) -> Result<T, MailboxError> {
    let guard = self.lock();
    let mut guard = self
      .ready
      .wait_while(guard, |slot| !slot.closed && slot.value.is_none())
      .unwrap_or_else(PoisonError::into_inner);
    Self::collect(&mut guard)
  }

  pub fn recv_timeout(&self, timeout: Duration) -> Result<T, MailboxError> {
    let guard = self.lock();
    let (mut guard, result) = self
      .ready
      .wait_timeout_while(guard, timeout, |slot| !slot.closed && slot.value.is_none())
      .unwrap_or_else(PoisonError::into_inner);
    if result.timed_out() && !guard.closed && guard.value.is_none() {
      return Err(MailboxError::Timeout);
    }
    Self::collect(&mut guard)
  }

  fn collect(slot: &mut Slot<T>) -> Result<T, MailboxError> {
    if slot.closed {
      return Err(MailboxError::Closed);
    }
    slot.value.take().ok_or(MailboxError::Timeout)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{sync::Arc, thread};

  #[test]
  fn put_evicts_previous_value() {
    let mailbox = Mailbox::new();
    assert_eq!(mailbox.put(1), None);
    assert_eq!(mailbox.put(2), Some(1));
    assert_eq!(mailbox.take(), Some(2));
    assert_eq!(mailbox.take(), None);
  }

  #[test]
  fn recv_timeout_expires_on_empty_slot() {
    let mailbox = Mailbox::<u8>::new();
    assert_eq!(
      mailbox.recv_timeout(Duration::from_millis(20)),
      Err(MailboxError::Timeout)
    );
  }

  #[test]
  fn recv_wakes_on_put_from_other_thread() {
    let mailbox = Arc::new(Mailbox::new());
    let sender = Arc::clone(&mailbox);
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      sender.put("frame");
    });
    assert_eq!(mailbox.recv_timeout(Duration::from_secs(5)), Ok("frame"));
    handle.join().unwrap();
  }

  #[test]
  fn close_wakes_blocked_receiver() {
    let mailbox = Arc::new(Mailbox::<u32>::new());
    let receiver = Arc::clone(&mailbox);
    let handle = thread::spawn(move || receiver.recv());
    thread::sleep(Duration::from_millis(20));
    mailbox.close();
    assert_eq!(handle.join().unwrap(), Err(MailboxError::Closed));
  }

  #[test]
  fn closed_mailbox_does_not_deliver_pending_value() {
    let mailbox = Mailbox::new();
    mailbox.put(7);
    mailbox.close();
    assert_eq!(mailbox.recv(), Err(MailboxError::Closed));
    assert_eq!(mailbox.take(), Some(7));
  }
}
