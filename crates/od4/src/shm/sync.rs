// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-shared pthread mutex and condition variable.
//!
//! Both live inside the mapping, so every handle here is a raw pointer into
//! it. pthread calls return the error code instead of setting `errno`.

use std::io;
use std::time::Duration;

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

/// Mutex and condition variable stored in shared memory.
#[derive(Clone, Copy)]
pub(crate) struct SharedSync {
    mutex: *mut libc::pthread_mutex_t,
    cond: *mut libc::pthread_cond_t,
}

impl SharedSync {
    /// # Safety
    ///
    /// Both pointers must stay valid, and properly aligned, for as long as the
    /// value (or a copy) is used.
    pub(crate) unsafe fn from_raw(
        mutex: *mut libc::pthread_mutex_t,
        cond: *mut libc::pthread_cond_t,
    ) -> Self {
        Self { mutex, cond }
    }

    /// Initialize both primitives as `PTHREAD_PROCESS_SHARED`. The mutex is
    /// error-checking, so relocking or unlocking from a non-owner fails
    /// instead of deadlocking.
    ///
    /// # Safety
    ///
    /// Must run exactly once, before any other process can see the segment.
    pub(crate) unsafe fn init(&self) -> io::Result<()> {
        let mut mattr: libc::pthread_mutexattr_t = std::mem::zeroed();
        check(libc::pthread_mutexattr_init(&mut mattr))?;
        let mutex_result = check(libc::pthread_mutexattr_setpshared(
            &mut mattr,
            libc::PTHREAD_PROCESS_SHARED,
        ))
        .and_then(|()| {
            check(libc::pthread_mutexattr_settype(
                &mut mattr,
                libc::PTHREAD_MUTEX_ERRORCHECK,
            ))
        })
        .and_then(|()| check(libc::pthread_mutex_init(self.mutex, &mattr)));
        libc::pthread_mutexattr_destroy(&mut mattr);
        mutex_result?;

        let mut cattr: libc::pthread_condattr_t = std::mem::zeroed();
        check(libc::pthread_condattr_init(&mut cattr))?;
        let cond_result = check(libc::pthread_condattr_setpshared(
            &mut cattr,
            libc::PTHREAD_PROCESS_SHARED,
        ))
        .and_then(|()| check(libc::pthread_cond_init(self.cond, &cattr)));
        libc::pthread_condattr_destroy(&mut cattr);
        cond_result
    }

    pub(crate) fn lock(&self) -> io::Result<()> {
        // SAFETY: the mutex was initialized by `init` and stays mapped (from_raw contract).
        check(unsafe { libc::pthread_mutex_lock(self.mutex) })
    }

    pub(crate) fn unlock(&self) -> io::Result<()> {
        // SAFETY: see `lock`; an unlock by a non-owner returns EPERM.
        check(unsafe { libc::pthread_mutex_unlock(self.mutex) })
    }

    /// Release the mutex, sleep until signalled, reacquire. May wake spuriously.
    pub(crate) fn wait(&self) -> io::Result<()> {
        // SAFETY: both primitives are initialized; the caller holds the mutex.
        check(unsafe { libc::pthread_cond_wait(self.cond, self.mutex) })
    }

    /// Like [`SharedSync::wait`] with an upper bound. Returns `false` on timeout.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = realtime_deadline(timeout)?;
        // SAFETY: both primitives are initialized; the caller holds the mutex.
        let rc = unsafe { libc::pthread_cond_timedwait(self.cond, self.mutex, &deadline) };
        match rc {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            rc => Err(io::Error::from_raw_os_error(rc)),
        }
    }

    pub(crate) fn notify_all(&self) -> io::Result<()> {
        // SAFETY: the condition variable was initialized by `init`.
        check(unsafe { libc::pthread_cond_broadcast(self.cond) })
    }
}

/// Absolute `CLOCK_REALTIME` time `timeout` from now.
fn realtime_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out-parameter.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let extra_secs = libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX);
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    let mut sec = now.tv_sec.saturating_add(extra_secs);
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec = sec.saturating_add(1);
    }
    Ok(libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    })
}
