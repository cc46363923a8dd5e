// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Occupied-slot list, headed by `QueueState::head`, kept in non-increasing
// priority order with FIFO order inside each priority.

use crate::error::fatal;
use crate::store::{QueueView, NIL};

/// Link the slot at `off` into the list ahead of the first message with a
/// strictly lower priority, or at the tail.
pub(crate) fn insert(view: &mut QueueView<'_>, off: u64, priority: u32) {
    let limit = view.layout().max_messages;
    let mut prev = NIL;
    let mut cur = view.state().head;
    let mut steps = 0usize;
    while cur != NIL {
        let node = view.slot(cur);
        if priority > node.priority {
            break;
        }
        prev = cur;
        cur = node.next;
        steps += 1;
        if steps > limit {
            fatal(format_args!("message list longer than {limit} entries"));
        }
    }
    view.slot(off).next = cur;
    if prev == NIL {
        view.state().head = off;
    } else {
        view.slot(prev).next = off;
    }
}

/// Unlink and return the highest-priority slot.
///
/// Only called when `current_messages` says the list is non-empty.
pub(crate) fn pop_head(view: &mut QueueView<'_>) -> u64 {
    let off = view.state().head;
    if off == NIL {
        let cur = view.state().current_messages;
        fatal(format_args!(
            "receive: current_messages = {cur}; message list empty"
        ));
    }
    let next = view.slot(off).next;
    view.state().head = next;
    off
}
