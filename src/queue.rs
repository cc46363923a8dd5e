// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Message queue handle: open/attach, send/receive, attributes,
// notification registration and close.
//
// Every operation follows the same shape: validate arguments without the
// lock, take the queue lock, work on the state through a `QueueView`,
// optionally wait on a condition (which releases and re-takes the lock),
// and let the guard release the lock on every return path.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::attr::{MqAttr, MQ_PRIO_MAX};
use crate::error::{fatal, MqError, Result};
use crate::free_list;
use crate::interrupt::{self, SignalPolicy};
use crate::mq_name;
use crate::notify::{NotifyEvent, Notifier, SignalNotifier};
use crate::priority_list;
use crate::store::{BackingStore, QueueView, StoreLayout};
use crate::sync::{Condition, QueueSync, SyncGuard, WaitOutcome};

/// How many times open re-runs the create/attach sequence when the store
/// appears or vanishes underneath it.
const OPEN_RACE_RETRIES: usize = 16;

const DEFAULT_ATTACH_RETRIES: u32 = 10;
const DEFAULT_ATTACH_INTERVAL: Duration = Duration::from_millis(100);

/// Options for opening or creating a queue, in the style of
/// [`std::fs::OpenOptions`].
#[derive(Clone)]
pub struct OpenOptions {
    create: bool,
    exclusive: bool,
    nonblocking: bool,
    mode: u32,
    attr: Option<MqAttr>,
    dir: Option<PathBuf>,
    identity: Option<NonZeroU32>,
    notifier: Option<Arc<dyn Notifier>>,
    attach_retries: u32,
    attach_interval: Duration,
}

impl OpenOptions {
    /// Open an existing queue, blocking mode, default directory.
    pub fn new() -> Self {
        Self {
            create: false,
            exclusive: false,
            nonblocking: false,
            mode: 0o600,
            attr: None,
            dir: None,
            identity: None,
            notifier: None,
            attach_retries: DEFAULT_ATTACH_RETRIES,
            attach_interval: DEFAULT_ATTACH_INTERVAL,
        }
    }

    /// Create the queue if it does not exist (`O_CREAT`).
    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    /// Fail if the queue already exists (`O_EXCL`). Only meaningful with `create`.
    pub fn exclusive(&mut self, exclusive: bool) -> &mut Self {
        self.exclusive = exclusive;
        self
    }

    /// Open the handle in non-blocking mode (`O_NONBLOCK`).
    pub fn nonblocking(&mut self, nonblocking: bool) -> &mut Self {
        self.nonblocking = nonblocking;
        self
    }

    /// Permission bits for a newly created backing file.
    pub fn mode(&mut self, mode: u32) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Sizing for a newly created queue. Ignored when attaching.
    pub fn attr(&mut self, attr: MqAttr) -> &mut Self {
        self.attr = Some(attr);
        self
    }

    /// Directory holding the backing file. See [`mq_name::default_dir`].
    pub fn dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.dir = Some(dir.into());
        self
    }

    /// Identity used for notification registration. Defaults to the process id.
    pub fn identity(&mut self, identity: NonZeroU32) -> &mut Self {
        self.identity = Some(identity);
        self
    }

    /// Delivery mechanism for notifications. Defaults to [`SignalNotifier`].
    pub fn notifier(&mut self, notifier: Arc<dyn Notifier>) -> &mut Self {
        self.notifier = Some(notifier);
        self
    }

    /// How often to re-check a store whose creator is still initialising it.
    pub fn attach_retries(&mut self, retries: u32) -> &mut Self {
        self.attach_retries = retries;
        self
    }

    pub fn attach_interval(&mut self, interval: Duration) -> &mut Self {
        self.attach_interval = interval;
        self
    }

    pub fn open(&self, name: &str) -> Result<MessageQueue> {
        MessageQueue::open(name, self)
    }

    fn resolve_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(mq_name::default_dir)
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// An open session on a named message queue.
///
/// Any number of handles, in any number of processes, may refer to the same
/// queue. A handle is `Send + Sync`; its non-blocking flag is its own.
pub struct MessageQueue {
    name: String,
    sync: QueueSync,
    store: BackingStore,
    nonblocking: AtomicBool,
    identity: u32,
    notifier: Arc<dyn Notifier>,
    closed: bool,
}

impl MessageQueue {
    /// Create or attach to the queue `name` according to `opts`.
    pub fn open(name: &str, opts: &OpenOptions) -> Result<Self> {
        mq_name::validate(name)?;
        let attr = opts.attr.unwrap_or_default();
        if opts.create {
            attr.validate()?;
        }
        let dir = opts.resolve_dir();
        std::fs::create_dir_all(&dir)?;
        let path = mq_name::store_path(&dir, name);

        for _ in 0..OPEN_RACE_RETRIES {
            if opts.create {
                match BackingStore::create(&path, StoreLayout::new(&attr), opts.mode) {
                    Ok(store) => {
                        if let Err(e) = store.initialize() {
                            drop(store);
                            let _ = std::fs::remove_file(&path);
                            return Err(e);
                        }
                        debug!(
                            "Created message queue '{}' ({} x {} bytes) at {}",
                            name,
                            attr.max_messages,
                            attr.message_size,
                            path.display()
                        );
                        return Self::from_store(name, store, opts);
                    }
                    Err(MqError::Io(e))
                        if e.kind() == std::io::ErrorKind::AlreadyExists && !opts.exclusive => {}
                    Err(e) => return Err(e),
                }
            }
            match Self::attach(&path, opts) {
                Ok(store) => {
                    debug!("Attached to message queue '{}' at {}", name, path.display());
                    return Self::from_store(name, store, opts);
                }
                // Unlinked between our create attempt and the attach: go again.
                Err(MqError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound && opts.create => {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
        Err(MqError::TimedOut)
    }

    /// Attach to an existing store, waiting out a creator that has not
    /// finished initialising it.
    fn attach(path: &Path, opts: &OpenOptions) -> Result<BackingStore> {
        let mut tries = 0;
        loop {
            match BackingStore::attach(path) {
                Err(MqError::NotReady) if tries < opts.attach_retries => {
                    tries += 1;
                    debug!(
                        "Queue at {} not ready yet, retrying in {:?} (attempt {}/{})",
                        path.display(),
                        opts.attach_interval,
                        tries,
                        opts.attach_retries
                    );
                    thread::sleep(opts.attach_interval);
                }
                Err(MqError::NotReady) => return Err(MqError::TimedOut),
                other => return other,
            }
        }
    }

    fn from_store(name: &str, store: BackingStore, opts: &OpenOptions) -> Result<Self> {
        let sync = QueueSync::open(store.sync_block(), store.path())?;
        let identity = opts
            .identity
            .map(NonZeroU32::get)
            .unwrap_or_else(std::process::id);
        Ok(Self {
            name: name.to_string(),
            sync,
            store,
            nonblocking: AtomicBool::new(opts.nonblocking),
            identity,
            notifier: opts
                .notifier
                .clone()
                .unwrap_or_else(|| Arc::new(SignalNotifier)),
            closed: false,
        })
    }

    /// Remove the queue named `name` from the default directory.
    ///
    /// Open handles keep working; the storage goes away when the last one
    /// closes.
    pub fn unlink(name: &str) -> Result<()> {
        Self::unlink_in(&mq_name::default_dir(), name)
    }

    /// Remove the queue named `name` from `dir`.
    pub fn unlink_in(dir: &Path, name: &str) -> Result<()> {
        mq_name::validate(name)?;
        std::fs::remove_file(mq_name::store_path(dir, name))?;
        debug!("Unlinked message queue '{}'", name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    fn check(&self) -> Result<()> {
        if !self.store.is_valid() {
            return Err(MqError::BadHandle);
        }
        Ok(())
    }

    fn lock(&self, policy: SignalPolicy) -> Result<SyncGuard<'_>> {
        self.check()?;
        self.sync.lock(policy)
    }

    /// Send `msg` with `priority`, blocking while the queue is full unless
    /// the handle is non-blocking.
    pub fn send(&self, msg: &[u8], priority: u32) -> Result<()> {
        self.send_until(msg, priority, None)
    }

    /// Like [`send`](Self::send), but give up with `TimedOut` once `deadline`
    /// passes while the queue is full.
    pub fn timedsend(&self, msg: &[u8], priority: u32, deadline: SystemTime) -> Result<()> {
        self.send_until(msg, priority, Some(deadline))
    }

    fn send_until(&self, msg: &[u8], priority: u32, deadline: Option<SystemTime>) -> Result<()> {
        interrupt::test_cancel()?;
        self.check()?;
        if priority >= MQ_PRIO_MAX {
            return Err(MqError::InvalidPriority(priority));
        }
        let layout = self.store.layout();
        if msg.len() > layout.message_size {
            return Err(MqError::MessageTooLarge {
                len: msg.len(),
                max: layout.message_size,
            });
        }

        let mut guard = self.lock(SignalPolicy::Fail)?;
        {
            let mut view = self.store.view(&mut guard);
            if view.state().current_messages == 0 {
                self.fire_notification(&mut view);
            }
        }

        loop {
            let current = self.store.view(&mut guard).state().current_messages as usize;
            if current < layout.max_messages {
                break;
            }
            if self.nonblocking.load(Ordering::Relaxed) {
                return Err(MqError::WouldBlock);
            }
            match guard.wait(Condition::NotFull, deadline, SignalPolicy::Fail)? {
                WaitOutcome::Signaled => {}
                WaitOutcome::TimedOut => return Err(MqError::TimedOut),
                WaitOutcome::Interrupted(why) => return Err(why.into()),
            }
        }

        let was_empty = {
            let mut view = self.store.view(&mut guard);
            let off = free_list::allocate(&mut view);
            view.payload(off)[..msg.len()].copy_from_slice(msg);
            let slot = view.slot(off);
            slot.len = msg.len() as u32;
            slot.priority = priority;
            priority_list::insert(&mut view, off, priority);

            let st = view.state();
            st.current_messages += 1;
            st.current_messages == 1
        };
        if was_empty {
            guard.signal(Condition::NotEmpty)?;
        }
        Ok(())
    }

    /// Fire and clear the notification registration, unless a receiver is
    /// already waiting to take the message.
    fn fire_notification(&self, view: &mut QueueView<'_>) {
        let st = view.state();
        if st.notify_owner == 0 || st.waiting_receivers != 0 {
            return;
        }
        let owner = st.notify_owner;
        let event = st.notify_event;
        st.notify_owner = 0;
        debug!("Queue '{}' notifying registrant {}", self.name, owner);
        if let Err(e) = self.notifier.deliver(owner, &event) {
            warn!("Failed to notify registrant {} of queue '{}': {}", owner, self.name, e);
        }
    }

    /// Receive the highest-priority message into `buf`, blocking while the
    /// queue is empty unless the handle is non-blocking.
    ///
    /// Returns the message length and priority. `buf` must hold at least
    /// `message_size` bytes.
    pub fn receive(&self, buf: &mut [u8]) -> Result<(usize, u32)> {
        self.receive_until(buf, None)
    }

    /// Like [`receive`](Self::receive), but give up with `TimedOut` once
    /// `deadline` passes while the queue is empty.
    pub fn timedreceive(&self, buf: &mut [u8], deadline: SystemTime) -> Result<(usize, u32)> {
        self.receive_until(buf, Some(deadline))
    }

    /// Receive into a freshly allocated buffer trimmed to the message.
    pub fn receive_vec(&self) -> Result<(Vec<u8>, u32)> {
        let mut buf = vec![0u8; self.store.layout().message_size];
        let (len, priority) = self.receive(&mut buf)?;
        buf.truncate(len);
        Ok((buf, priority))
    }

    fn receive_until(&self, buf: &mut [u8], deadline: Option<SystemTime>) -> Result<(usize, u32)> {
        interrupt::test_cancel()?;
        self.check()?;
        let layout = self.store.layout();
        if buf.len() < layout.message_size {
            return Err(MqError::BufferTooSmall {
                len: buf.len(),
                required: layout.message_size,
            });
        }

        let mut guard = self.lock(SignalPolicy::Fail)?;
        if self.store.view(&mut guard).state().current_messages == 0 {
            if self.nonblocking.load(Ordering::Relaxed) {
                return Err(MqError::WouldBlock);
            }
            self.store.view(&mut guard).state().waiting_receivers += 1;
            let waited = loop {
                if self.store.view(&mut guard).state().current_messages != 0 {
                    break Ok(());
                }
                match guard.wait(Condition::NotEmpty, deadline, SignalPolicy::Fail) {
                    Ok(WaitOutcome::Signaled) => {}
                    Ok(WaitOutcome::TimedOut) => break Err(MqError::TimedOut),
                    Ok(WaitOutcome::Interrupted(why)) => break Err(why.into()),
                    Err(e) => break Err(e),
                }
            };
            {
                let mut view = self.store.view(&mut guard);
                let st = view.state();
                st.waiting_receivers = st.waiting_receivers.saturating_sub(1);
            }
            waited?;
        }

        let (len, priority, was_full) = {
            let mut view = self.store.view(&mut guard);
            let off = priority_list::pop_head(&mut view);
            let (len, priority) = {
                let slot = view.slot(off);
                (slot.len as usize, slot.priority)
            };
            if len > layout.message_size {
                fatal(format_args!(
                    "message at {off:#x} claims {len} bytes, message size is {}",
                    layout.message_size
                ));
            }
            buf[..len].copy_from_slice(&view.payload(off)[..len]);
            free_list::release(&mut view, off);

            let st = view.state();
            let was_full = st.current_messages as usize == layout.max_messages;
            st.current_messages -= 1;
            (len, priority, was_full)
        };
        if was_full {
            guard.signal(Condition::NotFull)?;
        }
        Ok((len, priority))
    }

    /// Current attributes: this handle's flags plus the queue's sizing and
    /// message count.
    pub fn getattr(&self) -> Result<MqAttr> {
        let mut guard = self.lock(SignalPolicy::Restart)?;
        let layout = self.store.layout();
        let current = self.store.view(&mut guard).state().current_messages as usize;
        Ok(MqAttr {
            nonblocking: self.nonblocking.load(Ordering::Relaxed),
            max_messages: layout.max_messages,
            message_size: layout.message_size,
            current_messages: current,
        })
    }

    /// Apply the non-blocking flag from `attr` to this handle and return the
    /// attributes as they were. Every other field of `attr` is ignored.
    pub fn setattr(&self, attr: &MqAttr) -> Result<MqAttr> {
        let mut guard = self.lock(SignalPolicy::Restart)?;
        let layout = self.store.layout();
        let current = self.store.view(&mut guard).state().current_messages as usize;
        let previous = self.nonblocking.swap(attr.nonblocking, Ordering::Relaxed);
        Ok(MqAttr {
            nonblocking: previous,
            max_messages: layout.max_messages,
            message_size: layout.message_size,
            current_messages: current,
        })
    }

    /// Register (`Some`) or withdraw (`None`) this handle's identity for a
    /// one-shot notification when a message arrives on an empty queue.
    ///
    /// Registering fails with `Busy` while a different, live identity holds
    /// the registration. Withdrawing is a no-op unless this identity holds it.
    pub fn notify(&self, event: Option<NotifyEvent>) -> Result<()> {
        let mut guard = self.lock(SignalPolicy::Restart)?;
        let mut view = self.store.view(&mut guard);
        let st = view.state();
        match event {
            None => {
                if st.notify_owner == self.identity {
                    st.notify_owner = 0;
                }
            }
            Some(ev) => {
                let owner = st.notify_owner;
                if owner != 0 && owner != self.identity && self.notifier.is_alive(owner) {
                    return Err(MqError::Busy);
                }
                st.notify_owner = self.identity;
                st.notify_event = ev;
            }
        }
        Ok(())
    }

    /// Withdraw this identity's notification registration and release the
    /// handle. Other handles on the same queue are unaffected.
    ///
    /// If withdrawing fails, dropping the handle tries once more.
    pub fn close(mut self) -> Result<()> {
        self.notify(None)?;
        self.closed = true;
        debug!("Closed message queue '{}'", self.name);
        Ok(())
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.notify(None) {
            warn!("Failed to unregister notification on '{}': {}", self.name, e);
        }
    }
}
