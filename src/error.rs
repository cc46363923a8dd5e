// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error type shared by every queue operation.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors returned by message queue operations.
///
/// Shared-region corruption is deliberately absent: it ends the process
/// through [`fatal`] instead of being handed back to a caller.
#[derive(Debug, Error)]
pub enum MqError {
    /// `max_messages` or `message_size` is zero or over the limit.
    #[error("invalid queue attributes")]
    InvalidAttributes,
    /// Queue name is not of the form `/name`.
    #[error("invalid queue name: {0:?}")]
    InvalidName(String),
    /// Payload is longer than the queue's `message_size`.
    #[error("message of {len} bytes exceeds message size {max}")]
    MessageTooLarge { len: usize, max: usize },
    /// Receive buffer is shorter than the queue's `message_size`.
    #[error("receive buffer of {len} bytes is smaller than message size {required}")]
    BufferTooSmall { len: usize, required: usize },
    /// Priority is not below `MQ_PRIO_MAX`.
    #[error("invalid message priority {0}")]
    InvalidPriority(u32),
    /// Non-blocking send on a full queue or receive on an empty one.
    #[error("operation would block")]
    WouldBlock,
    /// The deadline passed while blocked.
    #[error("operation timed out")]
    TimedOut,
    /// An asynchronous interruption arrived and the wait was not restarted.
    #[error("operation interrupted")]
    Interrupted,
    /// The calling thread's cancel token was triggered.
    #[error("operation cancelled")]
    Cancelled,
    /// The backing store is not a correctly tagged queue.
    #[error("not a valid message queue")]
    BadHandle,
    /// The backing store exists but its creator has not finished initialising it.
    #[error("message queue initialisation in progress")]
    NotReady,
    /// Another live process already holds the notification registration.
    #[error("notification already registered")]
    Busy,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl MqError {
    /// The errno a POSIX `mq_*` call would set for this error.
    #[cfg(unix)]
    pub fn errno(&self) -> i32 {
        match self {
            MqError::InvalidAttributes | MqError::InvalidPriority(_) => libc::EINVAL,
            MqError::InvalidName(_) => libc::EINVAL,
            MqError::MessageTooLarge { .. } | MqError::BufferTooSmall { .. } => libc::EMSGSIZE,
            MqError::WouldBlock => libc::EAGAIN,
            MqError::TimedOut | MqError::NotReady => libc::ETIMEDOUT,
            MqError::Interrupted => libc::EINTR,
            MqError::Cancelled => libc::ECANCELED,
            MqError::BadHandle => libc::EBADF,
            MqError::Busy => libc::EBUSY,
            MqError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type Result<T> = std::result::Result<T, MqError>;

/// Report a broken invariant in the shared region and abort.
///
/// Other processes may already be looking at the same bytes, so there is no
/// safe way to continue or to unwind.
#[cold]
pub(crate) fn fatal(args: fmt::Arguments<'_>) -> ! {
    tracing::error!("message queue corrupted: {}", args);
    eprintln!("libmq: fatal: message queue corrupted: {args}");
    std::process::abort()
}
