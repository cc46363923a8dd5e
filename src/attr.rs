// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Queue attributes and limits, mirroring `struct mq_attr`.

use crate::error::{MqError, Result};

/// Upper bound on `max_messages` accepted at creation.
pub const MQ_MAXMSG_LIMIT: usize = 32768;

/// Upper bound on `message_size` accepted at creation.
pub const MQ_MSGSIZE_LIMIT: usize = 1_048_576;

/// Priorities must be strictly below this value.
pub const MQ_PRIO_MAX: u32 = 32768;

/// Linux defaults used when a queue is created without explicit attributes.
pub const DEFAULT_MAX_MESSAGES: usize = 10;
pub const DEFAULT_MESSAGE_SIZE: usize = 8192;

/// Attributes of an open queue.
///
/// `max_messages` and `message_size` are fixed when the queue is created.
/// `nonblocking` belongs to the handle, not the queue, and is the only field
/// `setattr` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqAttr {
    pub nonblocking: bool,
    pub max_messages: usize,
    pub message_size: usize,
    pub current_messages: usize,
}

impl MqAttr {
    /// Creation attributes with the given sizing.
    pub fn new(max_messages: usize, message_size: usize) -> Self {
        Self {
            nonblocking: false,
            max_messages,
            message_size,
            current_messages: 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_messages == 0
            || self.max_messages > MQ_MAXMSG_LIMIT
            || self.message_size == 0
            || self.message_size > MQ_MSGSIZE_LIMIT
        {
            return Err(MqError::InvalidAttributes);
        }
        Ok(())
    }
}

impl Default for MqAttr {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES, DEFAULT_MESSAGE_SIZE)
    }
}
