// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cooperative cancellation and asynchronous interruption of blocking
// queue operations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{MqError, Result};

static SIGNAL_EPOCH: AtomicUsize = AtomicUsize::new(0);

/// Record that an asynchronous interruption arrived.
///
/// Async-signal-safe: a signal handler may call this. Every lock or wait
/// blocked at that moment observes it within one wait slice and then either
/// restarts or fails with [`MqError::Interrupted`], per its [`SignalPolicy`].
pub fn raise() {
    SIGNAL_EPOCH.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn epoch() -> usize {
    SIGNAL_EPOCH.load(Ordering::SeqCst)
}

/// What a blocked lock or wait does when [`raise`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPolicy {
    /// Keep waiting as if nothing happened.
    Restart,
    /// Give up with [`MqError::Interrupted`].
    Fail,
}

/// Cancellation request for one thread.
///
/// Each thread owns one token, reachable through [`CancelToken::current`].
/// Another thread cancels it by calling [`cancel`](Self::cancel) on a clone.
/// The request stays pending until [`reset`](Self::reset), so every later
/// send or receive on the cancelled thread fails fast with
/// [`MqError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

thread_local! {
    static CURRENT: CancelToken = CancelToken::default();
}

impl CancelToken {
    /// The calling thread's token.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Withdraw a pending cancellation.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Fail with `Cancelled` if the calling thread has a pending cancellation.
pub(crate) fn test_cancel() -> Result<()> {
    if CancelToken::current().is_cancelled() {
        return Err(MqError::Cancelled);
    }
    Ok(())
}
