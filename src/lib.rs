// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX-style named message queues for systems without kernel mq support.
// A queue is a fixed-size file mapped into every process that opens it;
// the lock, conditions, message slots and lists all live inside the mapping.

pub mod attr;
pub use attr::{
    MqAttr, DEFAULT_MAX_MESSAGES, DEFAULT_MESSAGE_SIZE, MQ_MAXMSG_LIMIT, MQ_MSGSIZE_LIMIT,
    MQ_PRIO_MAX,
};

mod error;
pub use error::{MqError, Result};

pub mod interrupt;
pub use interrupt::{raise, CancelToken, SignalPolicy};

pub mod mq_name;

mod notify;
pub use notify::{Notifier, NotifyEvent, NotifyKind, SignalNotifier};

mod platform;

mod sync;
pub use sync::{Condition, Interruption, WaitOutcome};

mod store;
mod free_list;
mod priority_list;

mod queue;
pub use queue::{MessageQueue, OpenOptions};
