// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the backing-store mapping and the queue's
// inter-process mutex and condition variables.
//
// Windows has no process-shared condition variable, so each condition is a
// named manual-reset event. A waiter resets the event while it still holds
// the named mutex, then releases the mutex and waits on the event. Every
// signaller changes queue state under the mutex before setting the event,
// so a signal sent after the waiter checked its predicate is not lost.

use std::fs::File;
use std::io;
use std::os::windows::io::AsRawHandle;
use std::path::Path;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, FALSE, HANDLE, TRUE, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, CreateMutexW, ReleaseMutex, ResetEvent, SetEvent, WaitForSingleObject, INFINITE,
};

use crate::mq_name;
use crate::sync::Condition;

/// Encode a name as a null-terminated wide string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn slice_ms(slice: Duration) -> u32 {
    slice.as_millis().clamp(1, (INFINITE - 1) as u128) as u32
}

// ---------------------------------------------------------------------------
// PlatformMap: file mapping view of the backing file
// ---------------------------------------------------------------------------

pub struct PlatformMap {
    mapping: HANDLE,
    mem: *mut u8,
}

unsafe impl Send for PlatformMap {}
unsafe impl Sync for PlatformMap {}

impl PlatformMap {
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let mapping = unsafe {
            CreateFileMappingW(
                file.as_raw_handle() as HANDLE,
                ptr::null(),
                PAGE_READWRITE,
                (len as u64 >> 32) as u32,
                len as u32,
                ptr::null(),
            )
        };
        if mapping.is_null() {
            return Err(io::Error::last_os_error());
        }
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, len) };
        if view.Value.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(mapping) };
            return Err(e);
        }
        Ok(Self {
            mapping,
            mem: view.Value as *mut u8,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }
}

impl Drop for PlatformMap {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe {
                UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.mem as *mut _,
                })
            };
        }
        if !self.mapping.is_null() {
            unsafe { CloseHandle(self.mapping) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformSync: named mutex + two named manual-reset events
// ---------------------------------------------------------------------------

/// Reserved space in the backing store; the kernel objects live outside it.
#[repr(C)]
pub struct SyncBlock {
    _reserved: u64,
}

pub struct PlatformSync {
    mutex: HANDLE,
    events: [HANDLE; 2],
}

unsafe impl Send for PlatformSync {}
unsafe impl Sync for PlatformSync {}

impl PlatformSync {
    /// # Safety
    /// `block` must point into a writable mapping.
    pub unsafe fn init(block: *mut SyncBlock) -> io::Result<()> {
        ptr::write_bytes(block, 0, 1);
        Ok(())
    }

    /// Open (or create) the kernel objects named after the backing file.
    pub fn open(_block: *mut SyncBlock, path: &Path) -> io::Result<Self> {
        let mtx_name = to_wide(&mq_name::kernel_object_name(path, "lock"));
        let mutex = unsafe { CreateMutexW(ptr::null(), FALSE, mtx_name.as_ptr()) };
        if mutex.is_null() {
            return Err(io::Error::last_os_error());
        }
        let mut sync = Self {
            mutex,
            events: [ptr::null_mut(); 2],
        };
        for (slot, suffix) in sync.events.iter_mut().zip(["send", "recv"]) {
            let name = to_wide(&mq_name::kernel_object_name(path, suffix));
            let evt = unsafe { CreateEventW(ptr::null(), TRUE, FALSE, name.as_ptr()) };
            if evt.is_null() {
                return Err(io::Error::last_os_error());
            }
            *slot = evt;
        }
        Ok(sync)
    }

    fn acquire(&self, ms: u32) -> io::Result<bool> {
        match unsafe { WaitForSingleObject(self.mutex, ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_ABANDONED => {
                tracing::warn!("queue lock owner died; recovering lock");
                Ok(true)
            }
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn lock_for(&self, slice: Duration) -> io::Result<bool> {
        self.acquire(slice_ms(slice))
    }

    pub fn unlock(&self) -> io::Result<()> {
        if unsafe { ReleaseMutex(self.mutex) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn wait_for(&self, cond: Condition, slice: Duration) -> io::Result<bool> {
        let evt = self.events[cond.index()];
        unsafe { ResetEvent(evt) };
        self.unlock()?;
        let signalled = match unsafe { WaitForSingleObject(evt, slice_ms(slice)) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        };
        // The lock is always re-taken, whatever the event wait reported.
        self.acquire(INFINITE)?;
        signalled
    }

    pub fn signal(&self, cond: Condition) -> io::Result<()> {
        if unsafe { SetEvent(self.events[cond.index()]) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PlatformSync {
    fn drop(&mut self) {
        for h in self.events.iter().chain(std::iter::once(&self.mutex)) {
            if !h.is_null() {
                unsafe { CloseHandle(*h) };
            }
        }
    }
}
