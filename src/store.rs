// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Backing store: the fixed layout of a queue inside its mapped file.
//
//   +-----------------+  offset 0
//   | Preamble        |  validity tag + immutable sizing
//   +-----------------+
//   | SyncBlock       |  lock + not-full / not-empty conditions
//   +-----------------+
//   | QueueState      |  counters, list heads, notification
//   +-----------------+  first_slot()
//   | slot 0          |  SlotHeader + round_up(message_size, word)
//   | ...             |
//   | slot max-1      |
//   +-----------------+  total_size()
//
// Every link is a byte offset from the start of the file, never an address:
// each process maps the file at its own base. Offset 0 is the preamble, so
// it doubles as the null link.

use std::fs::OpenOptions;
use std::io;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::attr::MqAttr;
use crate::error::{fatal, MqError, Result};
use crate::notify::NotifyEvent;
use crate::platform::{PlatformMap, SyncBlock};
use crate::sync::{QueueSync, SyncGuard};

/// Written last during initialisation; attach refuses stores without it.
pub(crate) const MQ_MAGIC: u32 = 0x6d71_6864;

/// Null link.
pub(crate) const NIL: u64 = 0;

const WORD: usize = size_of::<usize>();

const fn round_up(n: usize, to: usize) -> usize {
    (n + to - 1) / to * to
}

#[repr(C)]
pub(crate) struct Preamble {
    magic: AtomicU32,
    max_messages: u32,
    message_size: u32,
    _pad: u32,
}

/// Mutable per-queue state. Only touched with the queue lock held.
#[repr(C)]
pub(crate) struct QueueState {
    pub current_messages: u32,
    pub waiting_receivers: u32,
    /// Identity registered for notification, 0 for none.
    pub notify_owner: u32,
    _pad: u32,
    pub head: u64,
    pub free: u64,
    pub notify_event: NotifyEvent,
}

#[repr(C)]
pub(crate) struct SlotHeader {
    pub next: u64,
    pub len: u32,
    pub priority: u32,
}

/// Byte layout of a store with the given sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreLayout {
    pub max_messages: usize,
    pub message_size: usize,
}

impl StoreLayout {
    const ALIGN: usize = {
        let a = align_of::<SyncBlock>();
        if a > 8 {
            a
        } else {
            8
        }
    };

    pub fn new(attr: &MqAttr) -> Self {
        Self {
            max_messages: attr.max_messages,
            message_size: attr.message_size,
        }
    }

    pub const fn sync_offset() -> usize {
        round_up(size_of::<Preamble>(), Self::ALIGN)
    }

    pub const fn state_offset() -> usize {
        round_up(Self::sync_offset() + size_of::<SyncBlock>(), Self::ALIGN)
    }

    pub const fn header_size() -> usize {
        round_up(Self::state_offset() + size_of::<QueueState>(), Self::ALIGN)
    }

    pub fn slot_stride(&self) -> usize {
        size_of::<SlotHeader>() + round_up(self.message_size, WORD)
    }

    pub fn first_slot(&self) -> u64 {
        Self::header_size() as u64
    }

    pub fn slot_offset(&self, i: usize) -> u64 {
        (Self::header_size() + i * self.slot_stride()) as u64
    }

    /// Only meaningful for sizing that passed [`checked_total_size`](Self::checked_total_size).
    pub fn total_size(&self) -> usize {
        Self::header_size() + self.max_messages * self.slot_stride()
    }

    /// File size for this sizing, or `None` if it is outside the queue
    /// limits or does not fit in `usize`.
    pub fn checked_total_size(&self) -> Option<usize> {
        MqAttr::new(self.max_messages, self.message_size)
            .validate()
            .ok()?;
        let stride = round_up(self.message_size, WORD).checked_add(size_of::<SlotHeader>())?;
        self.max_messages
            .checked_mul(stride)?
            .checked_add(Self::header_size())
    }

    /// Whether `off` is the start of a slot.
    pub fn is_slot(&self, off: u64) -> bool {
        let off = off as usize;
        off >= Self::header_size()
            && off < self.total_size()
            && (off - Self::header_size()) % self.slot_stride() == 0
    }
}

// ---------------------------------------------------------------------------
// Process-local mapping cache.
// Every handle in one process must reach a store through the same mapping:
// macOS pthread objects only work at the address they were initialised at,
// so a second mmap of the same file breaks the queue lock. Entries are keyed
// by file identity rather than path, so an unlinked and re-created queue
// never reuses the old mapping.
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod map_cache {
    use std::collections::HashMap;
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

    use crate::platform::PlatformMap;

    type Cache = HashMap<(u64, u64), Weak<PlatformMap>>;

    fn cache() -> &'static Mutex<Cache> {
        static CACHE: OnceLock<Mutex<Cache>> = OnceLock::new();
        CACHE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    /// Reuse this process's live mapping of `file`, or map it.
    pub(super) fn map_shared(file: &File, len: usize) -> io::Result<Arc<PlatformMap>> {
        let meta = file.metadata()?;
        let key = (meta.dev(), meta.ino());
        let mut c = cache().lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(map) = c.get(&key).and_then(Weak::upgrade) {
            return Ok(map);
        }
        c.retain(|_, w| w.strong_count() > 0);
        let map = Arc::new(PlatformMap::map(file, len)?);
        c.insert(key, Arc::downgrade(&map));
        Ok(map)
    }
}

#[cfg(unix)]
use map_cache::map_shared;

/// Windows names its synchronisation objects, so separate views are fine.
#[cfg(not(unix))]
fn map_shared(file: &std::fs::File, len: usize) -> io::Result<Arc<PlatformMap>> {
    Ok(Arc::new(PlatformMap::map(file, len)?))
}

/// A mapped backing file.
pub(crate) struct BackingStore {
    map: Arc<PlatformMap>,
    layout: StoreLayout,
    path: PathBuf,
}

impl BackingStore {
    /// Exclusively create the file at `path`, size it for `layout` and map it.
    /// The store is not usable until [`initialize`](Self::initialize) runs.
    pub fn create(path: &Path, layout: StoreLayout, mode: u32) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let total = layout
            .checked_total_size()
            .ok_or(MqError::InvalidAttributes)?;
        let file = opts.open(path)?;

        let mapped = file
            .set_len(total as u64)
            .and_then(|()| map_shared(&file, total));
        match mapped {
            Ok(map) => Ok(Self {
                map,
                layout,
                path: path.to_path_buf(),
            }),
            Err(e) => {
                let _ = std::fs::remove_file(path);
                Err(e.into())
            }
        }
    }

    /// Map an existing store and check that its creator finished with it.
    ///
    /// `NotReady` means the creator is still initialising; callers retry.
    pub fn attach(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < StoreLayout::header_size() {
            return Err(MqError::NotReady);
        }
        let map = map_shared(&file, len)?;
        drop(file);

        let pre = unsafe { &*(map.as_mut_ptr() as *const Preamble) };
        match pre.magic.load(Ordering::Acquire) {
            0 => return Err(MqError::NotReady),
            MQ_MAGIC => {}
            _ => return Err(MqError::BadHandle),
        }
        let layout = StoreLayout {
            max_messages: pre.max_messages as usize,
            message_size: pre.message_size as usize,
        };
        if layout.checked_total_size() != Some(len) {
            return Err(MqError::BadHandle);
        }
        Ok(Self {
            map,
            layout,
            path: path.to_path_buf(),
        })
    }

    /// Lay out an empty queue: sizing, state, every slot on the free list,
    /// synchronisation objects, and finally the validity tag.
    pub fn initialize(&self) -> Result<()> {
        let base = self.map.as_mut_ptr();
        unsafe {
            let pre = &mut *(base as *mut Preamble);
            pre.max_messages = self.layout.max_messages as u32;
            pre.message_size = self.layout.message_size as u32;

            let mut view = QueueView::from_raw(base, self.layout);
            view.format();

            QueueSync::init(self.sync_block())?;
            pre.magic.store(MQ_MAGIC, Ordering::Release);
        }
        Ok(())
    }

    pub fn sync_block(&self) -> *mut SyncBlock {
        unsafe { self.map.as_mut_ptr().add(StoreLayout::sync_offset()) as *mut SyncBlock }
    }

    pub fn layout(&self) -> StoreLayout {
        self.layout
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the validity tag is still intact.
    pub fn is_valid(&self) -> bool {
        let pre = unsafe { &*(self.map.as_mut_ptr() as *const Preamble) };
        pre.magic.load(Ordering::Acquire) == MQ_MAGIC
    }

    /// Mutable view of the queue state, borrowed from a held lock.
    pub fn view<'g>(&'g self, _guard: &'g mut SyncGuard<'_>) -> QueueView<'g> {
        unsafe { QueueView::from_raw(self.map.as_mut_ptr(), self.layout) }
    }
}

/// Exclusive access to the queue state and slots.
///
/// Obtained from [`BackingStore::view`], which borrows the lock guard, so
/// list and counter mutation cannot happen without the lock.
pub(crate) struct QueueView<'a> {
    base: *mut u8,
    layout: StoreLayout,
    _lock: PhantomData<&'a mut ()>,
}

impl<'a> QueueView<'a> {
    /// # Safety
    /// `base` must map at least `layout.total_size()` bytes, and the caller
    /// must have exclusive access to the state and slots for `'a`.
    pub unsafe fn from_raw(base: *mut u8, layout: StoreLayout) -> Self {
        Self {
            base,
            layout,
            _lock: PhantomData,
        }
    }

    pub fn layout(&self) -> StoreLayout {
        self.layout
    }

    pub fn state(&mut self) -> &mut QueueState {
        unsafe { &mut *(self.base.add(StoreLayout::state_offset()) as *mut QueueState) }
    }

    /// Header of the slot at `off`. A link that is not a slot means the
    /// shared region is corrupt.
    pub fn slot(&mut self, off: u64) -> &mut SlotHeader {
        if !self.layout.is_slot(off) {
            fatal(format_args!("link {off:#x} does not point at a slot"));
        }
        unsafe { &mut *(self.base.add(off as usize) as *mut SlotHeader) }
    }

    /// Payload buffer (full `message_size` capacity) of the slot at `off`.
    pub fn payload(&mut self, off: u64) -> &mut [u8] {
        if !self.layout.is_slot(off) {
            fatal(format_args!("link {off:#x} does not point at a slot"));
        }
        unsafe {
            let p = self.base.add(off as usize + size_of::<SlotHeader>());
            std::slice::from_raw_parts_mut(p, self.layout.message_size)
        }
    }

    /// Reset to an empty queue with every slot chained on the free list.
    pub fn format(&mut self) {
        let layout = self.layout;
        {
            let st = self.state();
            st.current_messages = 0;
            st.waiting_receivers = 0;
            st.notify_owner = 0;
            st._pad = 0;
            st.head = NIL;
            st.free = layout.first_slot();
            st.notify_event = NotifyEvent::none();
        }
        for i in 0..layout.max_messages {
            let next = if i + 1 < layout.max_messages {
                layout.slot_offset(i + 1)
            } else {
                NIL
            };
            let slot = self.slot(layout.slot_offset(i));
            slot.next = next;
            slot.len = 0;
            slot.priority = 0;
        }
    }
}

/// Heap-backed region for exercising the list code without a file.
#[cfg(test)]
pub(crate) struct TestArena {
    words: Vec<u64>,
    layout: StoreLayout,
}

#[cfg(test)]
impl TestArena {
    pub fn new(max_messages: usize, message_size: usize) -> Self {
        let layout = StoreLayout::new(&MqAttr::new(max_messages, message_size));
        let words = vec![0u64; (layout.total_size() + 7) / 8];
        let mut arena = Self { words, layout };
        arena.view().format();
        arena
    }

    pub fn view(&mut self) -> QueueView<'_> {
        unsafe { QueueView::from_raw(self.words.as_mut_ptr() as *mut u8, self.layout) }
    }
}
