// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::segment::Mapping;
use super::sync::SharedSync;
use super::{normalize_name, ShmError};
use crate::error::{Error, Result};
use crate::time::TimeStamp;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::ptr::{self, addr_of, addr_of_mut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// "OD4SHM01", stored last by the creator once the primitives are ready.
const SEGMENT_MAGIC: u64 = 0x4F44_3453_484D_3031;

/// Cache-line aligned start of the data area.
const DATA_ALIGN: usize = 64;

#[repr(C)]
struct Header {
    magic: AtomicU64,
    data_size: u64,
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    // fields below are only accessed with `mutex` held
    generation: u64,
    seconds: i64,
    microseconds: i64,
}

const DATA_OFFSET: usize = std::mem::size_of::<Header>().div_ceil(DATA_ALIGN) * DATA_ALIGN;

/// A named shared memory area guarded by a process-shared lock.
///
/// [`SharedMemory::create`] makes a new area; other processes attach with
/// [`SharedMemory::open`]. Data and timestamp are only reachable while the
/// calling thread holds the lock, either through the [`SharedMemoryGuard`]
/// returned by [`SharedMemory::lock`] or through the checked accessors on
/// `SharedMemory` itself, which fail with [`Error::NotLocked`] otherwise.
///
/// The creator unlinks the name on drop; processes already attached keep
/// their mapping.
pub struct SharedMemory {
    mapping: Mapping,
    sync: SharedSync,
    name: String,
    size: usize,
    creator: bool,
    /// Thread of this process currently holding the lock
    owner: Mutex<Option<ThreadId>>,
}

// SAFETY: the raw pointers inside `sync` point into `mapping`, which lives as
// long as `self`; the pthread primitives are designed for concurrent use.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Create a fresh area of `size` data bytes, replacing any object with the
    /// same name. A missing leading `/` is added.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let name = normalize_name(name)?;
        if size == 0 {
            return Err(Error::InvalidArgument("shared memory size must be > 0".into()));
        }
        let mapping = Mapping::create(&name, DATA_OFFSET + size)?;
        let header = mapping.as_ptr().cast::<Header>();

        // SAFETY:
        // - the mapping is page aligned and DATA_OFFSET + size bytes long, so the
        //   header fits and is properly aligned
        // - nobody else can use the primitives yet: the magic is still zero
        let sync = unsafe {
            let sync = SharedSync::from_raw(addr_of_mut!((*header).mutex), addr_of_mut!((*header).cond));
            if let Err(e) = sync.init() {
                let _ = Mapping::unlink(&name);
                return Err(ShmError::Sync(e).into());
            }
            addr_of_mut!((*header).data_size).write(size as u64);
            (*header).magic.store(SEGMENT_MAGIC, Ordering::Release);
            sync
        };

        log::debug!("[SHM] created {} ({} bytes)", name, size);
        Ok(Self {
            mapping,
            sync,
            name,
            size,
            creator: true,
            owner: Mutex::new(None),
        })
    }

    /// Attach to an existing area; its size is read from the segment.
    pub fn open(name: &str) -> Result<Self> {
        let name = normalize_name(name)?;
        let mapping = Mapping::open(&name)?;
        if mapping.len() < DATA_OFFSET {
            return Err(ShmError::BadHeader(name).into());
        }
        let header = mapping.as_ptr().cast::<Header>();

        // SAFETY: the mapping is page aligned and at least DATA_OFFSET bytes long.
        let (magic, data_size) = unsafe {
            (
                (*header).magic.load(Ordering::Acquire),
                addr_of!((*header).data_size).read(),
            )
        };
        let size = usize::try_from(data_size).unwrap_or(usize::MAX);
        if magic != SEGMENT_MAGIC || size > mapping.len() - DATA_OFFSET {
            return Err(ShmError::BadHeader(name).into());
        }

        // SAFETY: the magic proves the creator initialized both primitives; they
        // stay valid while `mapping` is alive, which is as long as `self`.
        let sync = unsafe {
            SharedSync::from_raw(addr_of_mut!((*header).mutex), addr_of_mut!((*header).cond))
        };

        log::debug!("[SHM] attached {} ({} bytes)", name, size);
        Ok(Self {
            mapping,
            sync,
            name,
            size,
            creator: false,
            owner: Mutex::new(None),
        })
    }

    /// Attach when `size` is `0`, create otherwise.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            Self::open(name)
        } else {
            Self::create(name, size)
        }
    }

    /// Remove `name` from the namespace without mapping it.
    pub fn unlink(name: &str) -> Result<()> {
        Mapping::unlink(&normalize_name(name)?)?;
        Ok(())
    }

    pub fn exists(name: &str) -> bool {
        normalize_name(name).is_ok_and(|n| Mapping::exists(&n))
    }

    /// Normalized name, with the leading `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data area size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// `true` once mapped and initialized; an instance only exists in that state.
    pub fn valid(&self) -> bool {
        // SAFETY: the header lies inside the live mapping.
        unsafe { (*self.header()).magic.load(Ordering::Acquire) == SEGMENT_MAGIC }
    }

    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// `true` while the calling thread holds the lock.
    pub fn is_locked(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Block until the lock is acquired.
    ///
    /// Fails when the calling thread already holds it.
    pub fn lock(&self) -> Result<SharedMemoryGuard<'_>> {
        if self.is_locked() {
            return Err(Error::InvalidArgument(format!(
                "{} is already locked by this thread",
                self.name
            )));
        }
        self.sync.lock().map_err(ShmError::Sync)?;
        *self.owner.lock() = Some(thread::current().id());
        Ok(SharedMemoryGuard {
            memory: self,
            _not_send: PhantomData,
        })
    }

    /// Copy of the data area.
    pub fn read_data(&self) -> Result<Vec<u8>> {
        self.ensure_locked()?;
        Ok(self.copy_out())
    }

    /// Overwrite the start of the data area with `bytes`.
    pub fn write_data(&self, bytes: &[u8]) -> Result<()> {
        self.ensure_locked()?;
        self.copy_in(bytes)
    }

    pub fn timestamp(&self) -> Result<TimeStamp> {
        self.ensure_locked()?;
        Ok(self.load_timestamp())
    }

    pub fn set_timestamp(&self, ts: TimeStamp) -> Result<()> {
        self.ensure_locked()?;
        self.store_timestamp(ts);
        Ok(())
    }

    /// Lock, wait for the next [`SharedMemory::notify_all`], unlock.
    ///
    /// Use [`SharedMemoryGuard::wait`] to wait while already holding the lock.
    pub fn wait(&self) -> Result<()> {
        let guard = self.lock()?;
        guard.wait()?;
        guard.unlock()
    }

    /// Wake every waiter, in this process or another. Takes the lock for the
    /// duration of the call unless the calling thread already holds it.
    pub fn notify_all(&self) -> Result<()> {
        if self.is_locked() {
            return self.signal();
        }
        let guard = self.lock()?;
        guard.notify_all()?;
        guard.unlock()
    }

    fn header(&self) -> *mut Header {
        self.mapping.as_ptr().cast::<Header>()
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: DATA_OFFSET + size <= mapping length, checked at create/open.
        unsafe { self.mapping.as_ptr().add(DATA_OFFSET) }
    }

    fn ensure_locked(&self) -> Result<()> {
        if self.is_locked() {
            Ok(())
        } else {
            Err(Error::NotLocked)
        }
    }

    // The helpers below require the lock to be held by the calling thread.
    // They copy through raw pointers so no Rust reference to the shared bytes
    // ever exists.

    fn copy_out(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.size];
        // SAFETY: the data area is `size` bytes inside the mapping and `out`
        // has the same length; the lock keeps other writers out.
        unsafe { ptr::copy_nonoverlapping(self.data_ptr(), out.as_mut_ptr(), self.size) };
        out
    }

    fn copy_in(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.size {
            return Err(Error::InvalidArgument(format!(
                "{} bytes do not fit in {} ({} bytes)",
                bytes.len(),
                self.name,
                self.size
            )));
        }
        // SAFETY: bounds checked above; the lock keeps other readers and writers out.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_ptr(), bytes.len()) };
        Ok(())
    }

    fn load_timestamp(&self) -> TimeStamp {
        let h = self.header();
        // SAFETY: header fields inside the live mapping, read under the lock.
        unsafe {
            TimeStamp::new(
                addr_of!((*h).seconds).read(),
                addr_of!((*h).microseconds).read(),
            )
        }
    }

    fn store_timestamp(&self, ts: TimeStamp) {
        let h = self.header();
        // SAFETY: header fields inside the live mapping, written under the lock.
        unsafe {
            addr_of_mut!((*h).seconds).write(ts.seconds());
            addr_of_mut!((*h).microseconds).write(i64::from(ts.microseconds()));
        }
    }

    fn generation(&self) -> u64 {
        // SAFETY: read under the lock.
        unsafe { addr_of!((*self.header()).generation).read() }
    }

    fn signal(&self) -> Result<()> {
        let h = self.header();
        // SAFETY: written under the lock.
        unsafe {
            let next = addr_of!((*h).generation).read().wrapping_add(1);
            addr_of_mut!((*h).generation).write(next);
        }
        self.sync.notify_all().map_err(ShmError::Sync)?;
        Ok(())
    }

    /// Wait for the generation to move past `start`, releasing the lock while
    /// asleep. `None` waits forever; returns `false` when the deadline passes.
    fn wait_for_signal(&self, timeout: Option<Duration>) -> Result<bool> {
        let start = self.generation();
        let deadline = timeout.map(|t| Instant::now() + t);
        let me = thread::current().id();

        // another thread of this process may own the lock while we sleep
        *self.owner.lock() = None;
        let outcome = loop {
            let woke = match deadline {
                None => self.sync.wait().map(|()| true),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    self.sync.wait_timeout(left)
                }
            };
            match woke {
                Ok(_) if self.generation() != start => break Ok(true),
                Ok(false) => break Ok(false),
                Ok(true) => {}
                Err(e) => break Err(Error::from(ShmError::Sync(e))),
            }
        };
        *self.owner.lock() = Some(me);
        outcome
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if self.owner.get_mut().take() == Some(thread::current().id()) {
            let _ = self.sync.unlock();
        }
        if self.creator {
            if let Err(e) = Mapping::unlink(&self.name) {
                log::warn!("[SHM] failed to unlink {}: {}", self.name, e);
            }
        }
        log::debug!("[SHM] released {}", self.name);
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("creator", &self.creator)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Proof that the calling thread holds the lock. Unlocks on drop.
///
/// The guard is tied to the locking thread: it is neither `Send` nor `Sync`.
pub struct SharedMemoryGuard<'a> {
    memory: &'a SharedMemory,
    _not_send: PhantomData<*const ()>,
}

impl SharedMemoryGuard<'_> {
    pub fn read_data(&self) -> Vec<u8> {
        self.memory.copy_out()
    }

    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.memory.copy_in(bytes)
    }

    pub fn timestamp(&self) -> TimeStamp {
        self.memory.load_timestamp()
    }

    pub fn set_timestamp(&mut self, ts: TimeStamp) {
        self.memory.store_timestamp(ts);
    }

    pub fn size(&self) -> usize {
        self.memory.size
    }

    /// Release the lock until another party calls `notify_all`, then
    /// reacquire it. Spurious wakeups are absorbed.
    pub fn wait(&self) -> Result<()> {
        self.memory.wait_for_signal(None).map(|_| ())
    }

    /// Like [`SharedMemoryGuard::wait`], giving up after `timeout`.
    /// Returns `Ok(false)` on timeout; the lock is held again either way.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.memory.wait_for_signal(Some(timeout))
    }

    pub fn notify_all(&self) -> Result<()> {
        self.memory.signal()
    }

    /// Explicit unlock, reporting failures that drop would swallow.
    pub fn unlock(self) -> Result<()> {
        let memory = self.memory;
        std::mem::forget(self);
        *memory.owner.lock() = None;
        memory.sync.unlock().map_err(ShmError::Sync)?;
        Ok(())
    }
}

impl Drop for SharedMemoryGuard<'_> {
    fn drop(&mut self) {
        *self.memory.owner.lock() = None;
        if let Err(e) = self.memory.sync.unlock() {
            log::warn!("[SHM] unlock of {} failed: {}", self.memory.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{mpsc, Arc};

    fn unique_name() -> String {
        format!("od4_shm_test_{}_{}", std::process::id(), fastrand::u64(..))
    }

    #[test]
    fn test_data_offset_aligned() {
        assert_eq!(DATA_OFFSET % DATA_ALIGN, 0);
        assert!(DATA_OFFSET >= std::mem::size_of::<Header>());
    }

    #[test]
    fn test_create_open_share_data() {
        let name = unique_name();
        let a = SharedMemory::create(&name, 256).unwrap();
        assert!(a.valid());
        assert_eq!(a.name(), format!("/{name}"));

        let b = SharedMemory::open(&name).unwrap();
        assert_eq!(b.size(), 256);
        assert!(!b.is_creator());

        {
            let mut g = a.lock().unwrap();
            g.write_data(b"shared").unwrap();
            g.set_timestamp(TimeStamp::new(12, 34));
        }
        let g = b.lock().unwrap();
        assert_eq!(&g.read_data()[..6], b"shared");
        assert_eq!(g.timestamp(), TimeStamp::new(12, 34));
    }

    #[test]
    fn test_accessors_require_lock() {
        let shm = SharedMemory::create(&unique_name(), 16).unwrap();
        assert!(!shm.is_locked());
        assert!(matches!(shm.read_data(), Err(Error::NotLocked)));
        assert!(matches!(shm.write_data(b"x"), Err(Error::NotLocked)));
        assert!(matches!(shm.timestamp(), Err(Error::NotLocked)));
        assert!(matches!(
            shm.set_timestamp(TimeStamp::now()),
            Err(Error::NotLocked)
        ));
        assert_eq!(Error::NotLocked.kind(), crate::ErrorKind::LockState);

        let guard = shm.lock().unwrap();
        assert!(shm.is_locked());
        shm.write_data(b"ok").unwrap();
        shm.set_timestamp(TimeStamp::new(1, 2)).unwrap();
        assert_eq!(shm.timestamp().unwrap(), TimeStamp::new(1, 2));
        assert!(shm.write_data(&[0u8; 17]).is_err());
        guard.unlock().unwrap();
        assert!(!shm.is_locked());
    }

    #[test]
    fn test_lock_is_per_thread() {
        let shm = Arc::new(SharedMemory::create(&unique_name(), 8).unwrap());
        let _guard = shm.lock().unwrap();
        assert!(shm.lock().is_err());

        let other = Arc::clone(&shm);
        let seen = std::thread::spawn(move || other.is_locked()).join().unwrap();
        assert!(!seen);
    }

    #[test]
    fn test_mutual_exclusion_across_mappings() {
        let name = unique_name();
        let creator = SharedMemory::create(&name, 8).unwrap();
        const THREADS: usize = 4;
        const ROUNDS: u64 = 500;

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                // each thread maps the segment separately, like another process
                let shm = SharedMemory::open(&name).unwrap();
                std::thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let mut g = shm.lock().unwrap();
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(&g.read_data());
                        let next = u64::from_le_bytes(buf) + 1;
                        g.write_data(&next.to_le_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let g = creator.lock().unwrap();
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&g.read_data());
        assert_eq!(u64::from_le_bytes(buf), THREADS as u64 * ROUNDS);
    }

    #[test]
    fn test_wait_released_by_notify() {
        let name = unique_name();
        let shm = SharedMemory::create(&name, 8).unwrap();
        let waiter = SharedMemory::open(&name).unwrap();
        let (ready_tx, ready_rx) = mpsc::channel();
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);

        let handle = std::thread::spawn(move || {
            let guard = waiter.lock().unwrap();
            ready_tx.send(()).unwrap();
            guard.wait().unwrap();
            assert!(waiter.is_locked());
            let data = guard.read_data();
            done_flag.store(true, Ordering::SeqCst);
            data[0]
        });

        ready_rx.recv().unwrap();
        // lock can only be taken once the waiter is asleep in wait()
        {
            let mut g = shm.lock().unwrap();
            assert!(!done.load(Ordering::SeqCst));
            g.write_data(&[7]).unwrap();
            g.notify_all().unwrap();
        }
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn test_wait_timeout_without_notify() {
        let shm = SharedMemory::create(&unique_name(), 8).unwrap();
        let guard = shm.lock().unwrap();
        let start = Instant::now();
        assert!(!guard.wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(shm.is_locked());
    }

    #[test]
    fn test_creator_unlinks_on_drop() {
        let name = unique_name();
        let shm = SharedMemory::create(&name, 8).unwrap();
        let attached = SharedMemory::open(&name).unwrap();
        assert!(SharedMemory::exists(&name));
        drop(attached);
        assert!(SharedMemory::exists(&name));
        drop(shm);
        assert!(!SharedMemory::exists(&name));
        assert!(matches!(
            SharedMemory::open(&name),
            Err(Error::Shm(ShmError::NotFound(_)))
        ));
    }

    #[test]
    fn test_new_dispatches_on_size() {
        let name = unique_name();
        let created = SharedMemory::new(&name, 32).unwrap();
        assert!(created.is_creator());
        let attached = SharedMemory::new(&name, 0).unwrap();
        assert_eq!(attached.size(), 32);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            SharedMemory::create(&unique_name(), 0),
            Err(Error::InvalidArgument(_))
        ));
    }
}
