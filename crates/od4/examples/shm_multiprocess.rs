// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SharedMemory Multi-Process Example
//!
//! A producer writes a frame counter into a named area and notifies; any
//! number of consumers wait on the area and print each frame.
//!
//! # Usage
//!
//! Terminal 1 (Producer):
//! ```bash
//! cargo run --example shm_multiprocess -- write
//! ```
//!
//! Terminal 2 (Consumer):
//! ```bash
//! cargo run --example shm_multiprocess -- read
//! ```

use od4::{SharedMemory, TimeStamp};
use std::time::Duration;

const AREA_NAME: &str = "/od4-demo-frames";
const AREA_SIZE: usize = 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mode = std::env::args().nth(1).unwrap_or_default();
    match mode.as_str() {
        "write" => run_producer(),
        "read" => run_consumer(),
        "cleanup" => {
            SharedMemory::unlink(AREA_NAME)?;
            println!("[OK] Removed {}", AREA_NAME);
            Ok(())
        }
        _ => {
            println!("Usage: shm_multiprocess <write|read|cleanup>");
            Ok(())
        }
    }
}

fn run_producer() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== SharedMemory Producer ===");
    let shm = SharedMemory::create(AREA_NAME, AREA_SIZE)?;
    println!("[OK] Created {} ({} bytes)", shm.name(), shm.size());

    for frame in 0u64.. {
        {
            let mut guard = shm.lock()?;
            let text = format!("frame {} from pid {}", frame, std::process::id());
            let mut payload = frame.to_le_bytes().to_vec();
            payload.extend_from_slice(text.as_bytes());
            guard.write_data(&payload)?;
            guard.set_timestamp(TimeStamp::now());
            guard.notify_all()?;
        }
        println!("[TX] frame {}", frame);
        std::thread::sleep(Duration::from_millis(500));
    }
    Ok(())
}

fn run_consumer() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== SharedMemory Consumer ===");
    let shm = SharedMemory::open(AREA_NAME)?;
    println!("[OK] Attached to {} ({} bytes)", shm.name(), shm.size());

    let guard = shm.lock()?;
    loop {
        if !guard.wait_timeout(Duration::from_secs(2))? {
            println!("[WAIT] no frame for 2 s");
            continue;
        }
        let data = guard.read_data();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[..8]);
        let text_end = data[8..].iter().position(|&b| b == 0).map_or(data.len(), |p| p + 8);
        let ts = guard.timestamp();
        println!(
            "[RX] frame {} at {}: {}",
            u64::from_le_bytes(raw),
            ts,
            String::from_utf8_lossy(&data[8..text_end])
        );
    }
}
