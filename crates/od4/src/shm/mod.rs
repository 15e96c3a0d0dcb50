// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named shared memory with a process-shared lock and condition variable.
//!
//! # Layout
//!
//! ```text
//! offset 0                                              DATA_OFFSET
//! +-------+------+--------------+-------------+-----+----+---------------------+
//! | magic | size | mutex        | cond        | gen | ts | data (size bytes)   |
//! +-------+------+--------------+-------------+-----+----+---------------------+
//!   pthread primitives are PTHREAD_PROCESS_SHARED; gen and ts are
//!   only touched with the mutex held
//! ```
//!
//! Any process mapping the same name shares the data area, the lock, the
//! notification and the embedded [`TimeStamp`](crate::TimeStamp).
//!
//! ```no_run
//! use od4::{SharedMemory, TimeStamp};
//!
//! let shm = SharedMemory::create("/od4-camera", 640 * 480)?;
//! {
//!     let mut guard = shm.lock()?;
//!     guard.write_data(&[0u8; 64])?;
//!     guard.set_timestamp(TimeStamp::now());
//!     guard.notify_all();
//! } // unlocked here
//! # Ok::<(), od4::Error>(())
//! ```
//!
//! Only Linux is supported; elsewhere every constructor returns
//! [`Error::Unsupported`](crate::Error::Unsupported).

#[cfg(target_os = "linux")]
mod memory;
#[cfg(target_os = "linux")]
mod segment;
#[cfg(target_os = "linux")]
mod sync;
#[cfg(not(target_os = "linux"))]
mod unsupported;

#[cfg(target_os = "linux")]
pub use memory::{SharedMemory, SharedMemoryGuard};
#[cfg(not(target_os = "linux"))]
pub use unsupported::{SharedMemory, SharedMemoryGuard};

use std::fmt;
use std::io;

/// Longest accepted object name, leading `/` included.
pub const MAX_NAME_LEN: usize = 255;

/// Shared-memory failures reported by the OS or found in the segment.
#[derive(Debug)]
pub enum ShmError {
    /// `shm_open`/`ftruncate` failed while creating.
    SegmentCreate(io::Error),
    /// `shm_open`/`fstat` failed while attaching.
    SegmentOpen(io::Error),
    /// Memory mapping failed.
    Mmap(io::Error),
    /// Mutex or condition variable call failed.
    Sync(io::Error),
    /// Name is empty, too long, or contains `/` after the prefix.
    InvalidName(String),
    /// No object with this name.
    NotFound(String),
    /// Object exists but was not initialized as an OD4 segment.
    BadHeader(String),
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "Shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "Shared memory segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "Memory mapping failed: {e}"),
            Self::Sync(e) => write!(f, "Shared mutex/condition failure: {e}"),
            Self::InvalidName(name) => write!(f, "Invalid segment name: {name}"),
            Self::NotFound(name) => write!(f, "Segment not found: {name}"),
            Self::BadHeader(name) => write!(f, "Segment {name} is not an OD4 segment"),
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e) | Self::SegmentOpen(e) | Self::Mmap(e) | Self::Sync(e) => Some(e),
            _ => None,
        }
    }
}

/// Prefix `name` with `/` when missing and check it is a valid object name.
pub fn normalize_name(name: &str) -> Result<String, ShmError> {
    let normalized = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    if normalized.len() < 2 {
        return Err(ShmError::InvalidName(format!("empty name: {name:?}")));
    }
    if normalized[1..].contains('/') {
        return Err(ShmError::InvalidName(format!(
            "Segment name cannot contain '/' after prefix: {name}"
        )));
    }
    if normalized.contains('\0') {
        return Err(ShmError::InvalidName(format!("NUL in name: {name:?}")));
    }
    if normalized.len() > MAX_NAME_LEN {
        return Err(ShmError::InvalidName(format!(
            "Segment name too long (max {MAX_NAME_LEN}): {name}"
        )));
    }
    Ok(normalized)
}
