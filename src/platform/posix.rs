// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the backing-store mapping and the queue's
// inter-process mutex and condition variables.
//
// The mutex and both condition variables live inside the mapped file, in the
// `SyncBlock` placed right after the preamble, so every process that maps
// the file shares them.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;
use std::time::Duration;

use crate::sync::Condition;

// ---------------------------------------------------------------------------
// Robust mutex symbols, not exposed by `libc` on all platforms.
// macOS has no robust mutexes.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
    fn pthread_mutex_timedlock(
        mutex: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

/// Adaptive backoff: spin, then pause, then yield, then sleep 1ms.
#[cfg(target_os = "macos")]
fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// Map a pthread return code onto `io::Result`.
fn cvt(eno: libc::c_int) -> io::Result<()> {
    match eno {
        0 => Ok(()),
        e => Err(io::Error::from_raw_os_error(e)),
    }
}

/// CLOCK_REALTIME now + `slice`, as pthread timed calls expect.
fn abs_after(slice: Duration) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    let ns_total = ts.tv_nsec as u64 + slice.subsec_nanos() as u64;
    ts.tv_sec += slice.as_secs() as libc::time_t + (ns_total / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;
    ts
}

// ---------------------------------------------------------------------------
// PlatformMap: shared read/write mapping of the backing file
// ---------------------------------------------------------------------------

pub struct PlatformMap {
    mem: *mut u8,
    len: usize,
}

// Safety: the mapping is process-shared by design; all mutation of its
// contents is serialised by the queue lock.
unsafe impl Send for PlatformMap {}
unsafe impl Sync for PlatformMap {}

impl PlatformMap {
    /// Map the first `len` bytes of `file` shared and read/write.
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            mem: mem as *mut u8,
            len,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }
}

impl Drop for PlatformMap {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.len) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformSync: pthread mutex + two condition variables in the mapping
// ---------------------------------------------------------------------------

/// Synchronisation objects embedded in the backing store.
#[repr(C)]
pub struct SyncBlock {
    mutex: libc::pthread_mutex_t,
    conds: [libc::pthread_cond_t; 2],
}

pub struct PlatformSync {
    block: *mut SyncBlock,
}

unsafe impl Send for PlatformSync {}
unsafe impl Sync for PlatformSync {}

impl PlatformSync {
    /// Initialise the mutex (`PTHREAD_PROCESS_SHARED`, robust where the
    /// platform has it) and both condition variables (`PTHREAD_PROCESS_SHARED`).
    ///
    /// # Safety
    /// `block` must point into a writable mapping that no other process is
    /// using yet.
    pub unsafe fn init(block: *mut SyncBlock) -> io::Result<()> {
        ptr::write_bytes(block, 0, 1);

        let mut mattr: libc::pthread_mutexattr_t = std::mem::zeroed();
        cvt(libc::pthread_mutexattr_init(&mut mattr))?;
        let mut eno = libc::pthread_mutexattr_setpshared(&mut mattr, libc::PTHREAD_PROCESS_SHARED);
        #[cfg(not(target_os = "macos"))]
        if eno == 0 {
            eno = pthread_mutexattr_setrobust(&mut mattr, PTHREAD_MUTEX_ROBUST);
        }
        if eno == 0 {
            eno = libc::pthread_mutex_init(&mut (*block).mutex, &mattr);
        }
        libc::pthread_mutexattr_destroy(&mut mattr);
        cvt(eno)?;

        let mut cattr: libc::pthread_condattr_t = std::mem::zeroed();
        cvt(libc::pthread_condattr_init(&mut cattr))?;
        eno = libc::pthread_condattr_setpshared(&mut cattr, libc::PTHREAD_PROCESS_SHARED);
        for cond in (*block).conds.iter_mut() {
            if eno != 0 {
                break;
            }
            eno = libc::pthread_cond_init(cond, &cattr);
        }
        libc::pthread_condattr_destroy(&mut cattr);
        cvt(eno)
    }

    /// Bind to an already initialised block. `_path` names kernel objects on
    /// platforms that need them; POSIX keeps everything in the mapping.
    pub fn open(block: *mut SyncBlock, _path: &Path) -> io::Result<Self> {
        Ok(Self { block })
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        unsafe { ptr::addr_of_mut!((*self.block).mutex) }
    }

    fn cond_ptr(&self, cond: Condition) -> *mut libc::pthread_cond_t {
        unsafe { ptr::addr_of_mut!((*self.block).conds[cond.index()]) }
    }

    /// Recover a robust mutex whose previous owner died while holding it.
    #[cfg(not(target_os = "macos"))]
    fn make_consistent(&self) -> io::Result<()> {
        tracing::warn!("queue lock owner died; recovering lock");
        cvt(unsafe { pthread_mutex_consistent(self.mtx_ptr()) })
    }

    /// `EOWNERDEAD` from a lock call: the lock is ours but inconsistent.
    /// On failure the lock is released again, since no guard will own it.
    #[cfg(not(target_os = "macos"))]
    fn recover_owner_dead(&self) -> io::Result<()> {
        if let Err(e) = self.make_consistent() {
            let _ = self.unlock();
            return Err(e);
        }
        Ok(())
    }

    /// Try to take the lock for at most `slice`.
    /// Returns `Ok(true)` if acquired, `Ok(false)` on timeout.
    pub fn lock_for(&self, slice: Duration) -> io::Result<bool> {
        #[cfg(target_os = "macos")]
        {
            // No pthread_mutex_timedlock: poll with backoff.
            let deadline = std::time::Instant::now() + slice;
            let mut k = 0u32;
            loop {
                let eno = unsafe { libc::pthread_mutex_trylock(self.mtx_ptr()) };
                match eno {
                    0 => return Ok(true),
                    libc::EBUSY => {}
                    _ => return Err(io::Error::from_raw_os_error(eno)),
                }
                if std::time::Instant::now() >= deadline {
                    return Ok(false);
                }
                adaptive_yield(&mut k);
            }
        }
        #[cfg(not(target_os = "macos"))]
        {
            let ts = abs_after(slice);
            loop {
                let eno = unsafe { pthread_mutex_timedlock(self.mtx_ptr(), &ts) };
                match eno {
                    0 => return Ok(true),
                    libc::ETIMEDOUT => return Ok(false),
                    EOWNERDEAD => {
                        self.recover_owner_dead()?;
                        return Ok(true);
                    }
                    libc::EINTR => continue,
                    _ => return Err(io::Error::from_raw_os_error(eno)),
                }
            }
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        cvt(unsafe { libc::pthread_mutex_unlock(self.mtx_ptr()) })
    }

    /// Release the lock, wait on `cond` for at most `slice`, re-acquire.
    /// Returns `Ok(true)` if signalled, `Ok(false)` if the slice ran out.
    /// The lock is held again whenever this returns.
    pub fn wait_for(&self, cond: Condition, slice: Duration) -> io::Result<bool> {
        let ts = abs_after(slice);
        let eno = unsafe { libc::pthread_cond_timedwait(self.cond_ptr(cond), self.mtx_ptr(), &ts) };
        match eno {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                self.make_consistent()?;
                Ok(true)
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    /// Wake one waiter on `cond`. The caller holds the lock.
    pub fn signal(&self, cond: Condition) -> io::Result<()> {
        cvt(unsafe { libc::pthread_cond_signal(self.cond_ptr(cond)) })
    }
}

// The objects stay in the file after the last handle closes. Destroying them
// here would break other processes still mapping the same store.
