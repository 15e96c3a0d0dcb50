// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory mapping.
//!
//! Thin wrapper over `shm_open`, `ftruncate`, `fstat` and `mmap`. The
//! mapping is released on drop; the name stays until [`Mapping::unlink`].

use super::ShmError;
use std::ffi::CString;
use std::io;
use std::ptr;

/// A mapped shared memory object.
pub(crate) struct Mapping {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the pointer refers to a MAP_SHARED region valid until munmap in Drop;
// concurrent access to its contents is serialized by the process-shared mutex
// stored inside it.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

fn c_name(name: &str) -> Result<CString, ShmError> {
    CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))
}

/// Map `len` bytes of `fd` read/write, then close `fd`.
fn map_fd(fd: libc::c_int, len: usize) -> Result<*mut u8, ShmError> {
    // SAFETY:
    // - null hint lets the kernel choose the address
    // - fd is an open shm descriptor sized to at least `len` bytes by the caller
    // - MAP_FAILED is checked below
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    let err = io::Error::last_os_error();

    // SAFETY: fd is valid and not used after this point; the mapping keeps its own reference.
    unsafe { libc::close(fd) };

    if ptr == libc::MAP_FAILED {
        return Err(ShmError::Mmap(err));
    }
    Ok(ptr.cast::<u8>())
}

impl Mapping {
    /// Create `name` with `len` zeroed bytes, replacing any object of that name.
    pub(crate) fn create(name: &str, len: usize) -> Result<Self, ShmError> {
        let c_name = c_name(name)?;
        let Ok(file_len) = libc::off_t::try_from(len) else {
            return Err(ShmError::SegmentCreate(io::Error::from(io::ErrorKind::InvalidInput)));
        };

        // SAFETY:
        // - c_name is a valid NUL-terminated string
        // - shm_unlink on a missing name only returns ENOENT, which is ignored
        // - O_CREAT|O_EXCL after the unlink guarantees a fresh object
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(ShmError::SegmentCreate(io::Error::last_os_error()));
        }

        // SAFETY: fd is the descriptor returned by the successful shm_open above.
        if unsafe { libc::ftruncate(fd, file_len) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid; this is the only close on the error path and the
            // half-created name is removed again.
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(ShmError::SegmentCreate(err));
        }

        let ptr = match map_fd(fd, len) {
            Ok(ptr) => ptr,
            Err(e) => {
                // SAFETY: c_name is valid; removes the object nobody else has seen initialized.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };
        // ftruncate zero-fills a new object, no explicit clear needed
        Ok(Self { ptr, len })
    }

    /// Map the whole existing object `name`.
    pub(crate) fn open(name: &str) -> Result<Self, ShmError> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string; mode is ignored without O_CREAT.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(name.to_string()));
            }
            return Err(ShmError::SegmentOpen(err));
        }

        // SAFETY: an all-zero stat is a valid value for fstat to overwrite.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid and st is a properly sized out-parameter.
        if unsafe { libc::fstat(fd, &mut st) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and closed exactly once on this path.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentOpen(err));
        }
        let len = usize::try_from(st.st_size).unwrap_or(0);
        if len == 0 {
            // SAFETY: fd is valid and closed exactly once on this path.
            unsafe { libc::close(fd) };
            return Err(ShmError::BadHeader(name.to_string()));
        }

        let ptr = map_fd(fd, len)?;
        Ok(Self { ptr, len })
    }

    /// Remove `name`. A missing name is not an error.
    pub(crate) fn unlink(name: &str) -> Result<(), ShmError> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid NUL-terminated string; only the namespace is affected.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }
        Ok(())
    }

    pub(crate) fn exists(name: &str) -> bool {
        let Ok(c_name) = c_name(name) else {
            return false;
        };
        // SAFETY: c_name is a valid NUL-terminated string; mode is ignored without O_CREAT.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            return false;
        }
        // SAFETY: fd is valid and not used afterwards.
        unsafe { libc::close(fd) };
        true
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly what mmap returned and the region is unmapped once.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.len);
        }
    }
}
