// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One-shot "queue became non-empty" notification.
// The queue decides when to fire and clears the registration; a `Notifier`
// performs the actual delivery.

use std::io;

const KIND_NONE: u32 = 0;
const KIND_SIGNAL: u32 = 1;

/// How a registrant wants to be told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// Registration only; nothing is delivered (`SIGEV_NONE`).
    None,
    /// Send a signal to the registrant (`SIGEV_SIGNAL`).
    Signal,
}

/// Notification descriptor stored in the queue, a subset of `struct sigevent`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyEvent {
    kind: u32,
    signo: i32,
    value: u64,
}

impl NotifyEvent {
    pub const fn none() -> Self {
        Self {
            kind: KIND_NONE,
            signo: 0,
            value: 0,
        }
    }

    /// Deliver `signo` to the registrant with `value` as its `sigval`
    /// payload. Platforms without `sigqueue(3)` deliver the bare signal.
    pub const fn signal(signo: i32, value: u64) -> Self {
        Self {
            kind: KIND_SIGNAL,
            signo,
            value,
        }
    }

    pub fn kind(&self) -> NotifyKind {
        match self.kind {
            KIND_SIGNAL => NotifyKind::Signal,
            _ => NotifyKind::None,
        }
    }

    pub fn signo(&self) -> i32 {
        self.signo
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

/// Delivery side of queue notifications.
///
/// `deliver` is called with the queue lock held, so it must not block.
pub trait Notifier: Send + Sync {
    /// Hand `event` to the registered identity `owner`.
    fn deliver(&self, owner: u32, event: &NotifyEvent) -> io::Result<()>;

    /// Whether `owner` still exists. A registration held by a dead owner is
    /// replaced instead of rejected.
    fn is_alive(&self, owner: u32) -> bool;
}

/// Default notifier: identities are process ids, delivery is a queued
/// signal carrying the event value.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalNotifier;

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_signal(pid: libc::pid_t, signo: i32, value: u64) -> libc::c_int {
    let val = libc::sigval {
        sival_ptr: value as usize as *mut libc::c_void,
    };
    unsafe { libc::sigqueue(pid, signo, val) }
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn send_signal(pid: libc::pid_t, signo: i32, _value: u64) -> libc::c_int {
    unsafe { libc::kill(pid, signo) }
}

#[cfg(unix)]
impl Notifier for SignalNotifier {
    fn deliver(&self, owner: u32, event: &NotifyEvent) -> io::Result<()> {
        if event.kind() != NotifyKind::Signal {
            return Ok(());
        }
        if send_signal(owner as libc::pid_t, event.signo, event.value) == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn is_alive(&self, owner: u32) -> bool {
        if unsafe { libc::kill(owner as libc::pid_t, 0) } != -1 {
            return true;
        }
        io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

#[cfg(windows)]
impl Notifier for SignalNotifier {
    fn deliver(&self, owner: u32, event: &NotifyEvent) -> io::Result<()> {
        if event.kind() == NotifyKind::Signal {
            tracing::debug!(owner, signo = event.signo, "no signal delivery on this platform");
        }
        Ok(())
    }

    fn is_alive(&self, owner: u32) -> bool {
        use windows_sys::Win32::Foundation::{CloseHandle, FALSE, STILL_ACTIVE};
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        let h = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, owner) };
        if h.is_null() {
            return false;
        }
        let mut code = 0u32;
        let ok = unsafe { GetExitCodeProcess(h, &mut code) };
        unsafe { CloseHandle(h) };
        ok != 0 && code == STILL_ACTIVE as u32
    }
}
