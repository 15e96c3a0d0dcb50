// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SharedMemory between independent attachments, the way two processes use it.

#![cfg(target_os = "linux")]

use od4::{Error, ErrorKind, SharedMemory, TimeStamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

fn unique_name(tag: &str) -> String {
    format!("/od4-it-{}-{}-{}", tag, std::process::id(), fastrand::u32(..))
}

#[test]
fn test_second_attachment_sees_writes() {
    let name = unique_name("attach");
    let producer = SharedMemory::create(&name, 64).unwrap();
    let consumer = SharedMemory::open(&name).unwrap();

    assert!(producer.is_creator());
    assert!(!consumer.is_creator());
    assert_eq!(consumer.size(), 64);
    assert!(consumer.valid());

    {
        let mut guard = producer.lock().unwrap();
        guard.write_data(b"frame-1").unwrap();
        guard.set_timestamp(TimeStamp::new(1_700_000_000, 250));
    }

    let guard = consumer.lock().unwrap();
    assert_eq!(&guard.read_data()[..7], b"frame-1");
    assert_eq!(guard.timestamp(), TimeStamp::new(1_700_000_000, 250));
}

#[test]
fn test_lock_contract() {
    let name = unique_name("contract");
    let shm = SharedMemory::create(&name, 16).unwrap();

    let err = shm.read_data().unwrap_err();
    assert!(matches!(err, Error::NotLocked));
    assert_eq!(err.kind(), ErrorKind::LockState);
    assert!(shm.set_timestamp(TimeStamp::now()).is_err());

    let guard = shm.lock().unwrap();
    assert!(shm.is_locked());
    assert!(shm.lock().is_err());
    assert_eq!(shm.read_data().unwrap().len(), 16);
    assert!(shm.write_data(&[0u8; 17]).is_err());
    guard.unlock().unwrap();
    assert!(!shm.is_locked());
}

#[test]
fn test_counter_under_contention() {
    const WORKERS: usize = 4;
    const ROUNDS: u64 = 500;

    let name = unique_name("counter");
    let owner = SharedMemory::create(&name, 8).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let name = name.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let shm = SharedMemory::open(&name).unwrap();
                barrier.wait();
                for _ in 0..ROUNDS {
                    let mut guard = shm.lock().unwrap();
                    let data = guard.read_data();
                    let value = u64::from_le_bytes(data[..8].try_into().unwrap());
                    guard.write_data(&(value + 1).to_le_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let guard = owner.lock().unwrap();
    let data = guard.read_data();
    assert_eq!(
        u64::from_le_bytes(data[..8].try_into().unwrap()),
        WORKERS as u64 * ROUNDS
    );
}

#[test]
fn test_wait_notify_between_attachments() {
    let name = unique_name("notify");
    let producer = SharedMemory::create(&name, 32).unwrap();
    let ready = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let consumer_name = name.clone();
    let consumer_ready = Arc::clone(&ready);
    let consumer = thread::spawn(move || {
        let shm = SharedMemory::open(&consumer_name).unwrap();
        let guard = shm.lock().unwrap();
        consumer_ready.store(true, Ordering::SeqCst);
        guard.wait().unwrap();
        tx.send((guard.read_data(), guard.timestamp())).unwrap();
    });

    while !ready.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    // the consumer holds the lock until it is inside wait()
    {
        let mut guard = producer.lock().unwrap();
        guard.write_data(b"update").unwrap();
        guard.set_timestamp(TimeStamp::new(42, 7));
        guard.notify_all().unwrap();
    }

    let (data, ts) = rx.recv_timeout(Duration::from_secs(2)).expect("consumer woke");
    assert_eq!(&data[..6], b"update");
    assert_eq!(ts, TimeStamp::new(42, 7));
    consumer.join().unwrap();
}

#[test]
fn test_wait_timeout_without_notify() {
    let name = unique_name("timeout");
    let shm = SharedMemory::create(&name, 8).unwrap();
    let guard = shm.lock().unwrap();
    assert!(!guard.wait_timeout(Duration::from_millis(30)).unwrap());
    // lock is held again after the timeout
    assert!(shm.is_locked());
}

#[test]
fn test_creator_drop_unlinks() {
    let name = unique_name("unlink");
    let shm = SharedMemory::create(&name, 8).unwrap();
    assert!(SharedMemory::exists(&name));
    drop(shm);
    assert!(!SharedMemory::exists(&name));
    assert!(SharedMemory::open(&name).is_err());
}

#[test]
fn test_new_with_zero_size_opens() {
    let name = unique_name("new");
    let created = SharedMemory::new(&name, 128).unwrap();
    let opened = SharedMemory::new(&name, 0).unwrap();
    assert!(created.is_creator());
    assert!(!opened.is_creator());
    assert_eq!(opened.size(), 128);
}
