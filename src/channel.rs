//! Single-slot rendezvous channel.
//!
//! A [`Channel`] holds at most one pending value. Producers block until the slot is empty,
//! consumers block until it is filled. Both sides may be used from any number of threads.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Error returned by [`Channel::push`] and [`Channel::push_timeout`]; carries the rejected value.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushError<T> {
    #[error("send on closed channel")]
    Closed(T),
    #[error("timed out waiting for an empty slot")]
    Timeout(T),
}

impl<T> PushError<T> {
    /// Return the value that could not be delivered.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Closed(v) | PushError::Timeout(v) => v,
        }
    }
}

/// Error returned by [`Channel::pop_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    #[error("receive on closed channel")]
    Closed,
    #[error("timed out waiting for a value")]
    Timeout,
}

struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

pub struct Channel<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // a panic while holding the lock never leaves the slot half-written
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Close the channel and wake up all waiters.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Return `true` if a value waits in the slot.
    pub fn is_pending(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Deposit a value, blocking until the slot is empty.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.push_until(value, None)
    }

    /// Deposit a value, blocking at most `timeout` until the slot is empty.
    /// On timeout the value is handed back in [`PushError::Timeout`].
    pub fn push_timeout(&self, value: T, timeout: Duration) -> Result<(), PushError<T>> {
        self.push_until(value, Some(Instant::now() + timeout))
    }

    fn push_until(&self, value: T, deadline: Option<Instant>) -> Result<(), PushError<T>> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Err(PushError::Closed(value));
            }

            if slot.value.is_none() {
                slot.value = Some(value);
                self.cond.notify_all();
                return Ok(());
            }

            slot = match deadline {
                None => self.cond.wait(slot).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PushError::Timeout(value));
                    }
                    self.cond
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    /// Take a value, blocking until one is available. Returns `None` once the channel is closed.
    pub fn pop(&self) -> Option<T> {
        self.pop_until(None).ok()
    }

    /// Take a value, blocking at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        self.pop_until(Some(Instant::now() + timeout))
    }

    fn pop_until(&self, deadline: Option<Instant>) -> Result<T, PopError> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Err(PopError::Closed);
            }

            if let Some(value) = slot.value.take() {
                self.cond.notify_all();
                return Ok(value);
            }

            slot = match deadline {
                None => self.cond.wait(slot).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PopError::Timeout);
                    }
                    self.cond
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    /// Withdraw the pending value if it satisfies `pred`.
    pub fn take_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut slot = self.lock();
        if slot.value.as_ref().is_some_and(pred) {
            self.cond.notify_all();
            return slot.value.take();
        }
        None
    }
}
