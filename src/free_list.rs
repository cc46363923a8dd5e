// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Free-slot allocator: a singly linked stack of unused slots threaded
// through `SlotHeader::next`, headed by `QueueState::free`.

use crate::error::fatal;
use crate::store::{QueueView, NIL};

/// Pop a free slot and return its offset.
///
/// The caller has already checked that the queue is not full, so an empty
/// free list means the shared region is corrupt.
pub(crate) fn allocate(view: &mut QueueView<'_>) -> u64 {
    let off = view.state().free;
    if off == NIL {
        let cur = view.state().current_messages;
        fatal(format_args!(
            "send: current_messages = {cur}; free list empty"
        ));
    }
    let next = view.slot(off).next;
    view.state().free = next;
    off
}

/// Push the slot at `off` back onto the free list.
pub(crate) fn release(view: &mut QueueView<'_>, off: u64) {
    let free = view.state().free;
    view.slot(off).next = free;
    view.state().free = off;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TestArena;

    fn free_len(view: &mut QueueView<'_>) -> usize {
        let mut n = 0;
        let mut off = view.state().free;
        while off != NIL {
            n += 1;
            off = view.slot(off).next;
        }
        n
    }

    #[test]
    fn allocates_every_slot_once() {
        let mut arena = TestArena::new(4, 8);
        let mut view = arena.view();
        let mut got: Vec<u64> = (0..4).map(|_| allocate(&mut view)).collect();
        assert_eq!(view.state().free, NIL);
        got.sort_unstable();
        got.dedup();
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn release_is_lifo() {
        let mut arena = TestArena::new(3, 8);
        let mut view = arena.view();
        let a = allocate(&mut view);
        let b = allocate(&mut view);
        assert_eq!(free_len(&mut view), 1);
        release(&mut view, a);
        release(&mut view, b);
        assert_eq!(free_len(&mut view), 3);
        assert_eq!(allocate(&mut view), b);
        assert_eq!(allocate(&mut view), a);
    }
}
