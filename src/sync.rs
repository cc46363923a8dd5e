// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The queue lock and its two condition variables.
// Delegates to platform::PlatformSync (POSIX or Windows) and layers
// deadlines, cancellation and interruption on top of it.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::{MqError, Result};
use crate::interrupt::{self, CancelToken, SignalPolicy};
use crate::platform::{PlatformSync, SyncBlock};

/// Longest single platform wait. Cancellation and interruption are noticed
/// at least this often.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// The two conditions a queue waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Signalled when a receive takes a message from a full queue.
    NotFull,
    /// Signalled when a send puts a message on an empty queue.
    NotEmpty,
}

impl Condition {
    pub(crate) fn index(self) -> usize {
        match self {
            Condition::NotFull => 0,
            Condition::NotEmpty => 1,
        }
    }
}

/// Why a wait ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Cancelled,
    Signal,
}

impl From<Interruption> for MqError {
    fn from(i: Interruption) -> Self {
        match i {
            Interruption::Cancelled => MqError::Cancelled,
            Interruption::Signal => MqError::Interrupted,
        }
    }
}

/// Result of [`SyncGuard::wait`].
///
/// `Signaled` may be spurious; callers re-check their predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    Interrupted(Interruption),
}

/// Inter-process lock plus the not-full / not-empty conditions of one queue.
pub(crate) struct QueueSync {
    inner: PlatformSync,
}

impl QueueSync {
    /// Initialise the objects in a fresh store.
    ///
    /// # Safety
    /// `block` must point into a mapping no other handle is using yet.
    pub(crate) unsafe fn init(block: *mut SyncBlock) -> io::Result<()> {
        PlatformSync::init(block)
    }

    pub(crate) fn open(block: *mut SyncBlock, path: &Path) -> io::Result<Self> {
        Ok(Self {
            inner: PlatformSync::open(block, path)?,
        })
    }

    /// Acquire the lock.
    ///
    /// While blocked, a cancellation of the calling thread fails with
    /// `Cancelled`, and an interruption fails with `Interrupted` unless
    /// `policy` is `Restart`. The lock is not held after a failure.
    pub(crate) fn lock(&self, policy: SignalPolicy) -> Result<SyncGuard<'_>> {
        let cancel = CancelToken::current();
        let mut epoch = interrupt::epoch();
        loop {
            if self.inner.lock_for(WAIT_SLICE)? {
                return Ok(SyncGuard { sync: self });
            }
            if cancel.is_cancelled() {
                return Err(MqError::Cancelled);
            }
            let now = interrupt::epoch();
            if now != epoch {
                match policy {
                    SignalPolicy::Restart => epoch = now,
                    SignalPolicy::Fail => return Err(MqError::Interrupted),
                }
            }
        }
    }
}

/// Held queue lock. Unlocks on drop.
pub(crate) struct SyncGuard<'a> {
    sync: &'a QueueSync,
}

impl SyncGuard<'_> {
    /// Release the lock, wait for `cond`, and re-acquire the lock.
    ///
    /// A deadline already in the past returns `TimedOut` without releasing the
    /// lock. In every other case the lock is held again on return, including
    /// timeouts, interruptions and cancellation, so the caller can restore
    /// shared state before the guard drops.
    pub(crate) fn wait(
        &mut self,
        cond: Condition,
        deadline: Option<SystemTime>,
        policy: SignalPolicy,
    ) -> Result<WaitOutcome> {
        let cancel = CancelToken::current();
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Interrupted(Interruption::Cancelled));
        }
        let epoch = interrupt::epoch();
        let slice = match deadline {
            None => WAIT_SLICE,
            Some(d) => match d.duration_since(SystemTime::now()) {
                Ok(left) if !left.is_zero() => left.min(WAIT_SLICE),
                _ => return Ok(WaitOutcome::TimedOut),
            },
        };

        if self.sync.inner.wait_for(cond, slice)? {
            return Ok(WaitOutcome::Signaled);
        }
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Interrupted(Interruption::Cancelled));
        }
        if policy == SignalPolicy::Fail && interrupt::epoch() != epoch {
            return Ok(WaitOutcome::Interrupted(Interruption::Signal));
        }
        if deadline.is_some_and(|d| SystemTime::now() >= d) {
            return Ok(WaitOutcome::TimedOut);
        }
        // Slice ran out with time to spare: let the caller re-check.
        Ok(WaitOutcome::Signaled)
    }

    /// Wake one waiter on `cond`. State changes must already be made.
    pub(crate) fn signal(&self, cond: Condition) -> io::Result<()> {
        self.sync.inner.signal(cond)
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sync.inner.unlock() {
            tracing::warn!("failed to release queue lock: {}", e);
        }
    }
}
