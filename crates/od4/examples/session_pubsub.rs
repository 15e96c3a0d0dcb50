// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OD4 Session Pub/Sub Example
//!
//! One process publishes a counter at 10 Hz, another prints it.
//!
//! # Usage
//!
//! Terminal 1 (Subscriber):
//! ```bash
//! cargo run --example session_pubsub -- sub
//! ```
//!
//! Terminal 2 (Publisher):
//! ```bash
//! cargo run --example session_pubsub -- pub
//! ```

use od4::{Envelope, OD4Session, TimeStamp};
use std::sync::Arc;
use std::time::Duration;

const CID: u16 = 111;
const COUNTER_TYPE: u32 = 1001;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mode = std::env::args().nth(1).unwrap_or_default();
    match mode.as_str() {
        "pub" => run_publisher(),
        "sub" => run_subscriber(),
        _ => {
            println!("Usage: session_pubsub <pub|sub>");
            Ok(())
        }
    }
}

fn run_publisher() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== OD4 Publisher (CID {}) ===", CID);
    let session = Arc::new(OD4Session::new(CID)?);

    let sink = Arc::clone(&session);
    let mut counter = 0u64;
    session.time_trigger(10.0, move || {
        counter += 1;
        let env = Envelope::new(COUNTER_TYPE, counter.to_le_bytes().to_vec())
            .with_sender_stamp(std::process::id())
            .with_sampled(TimeStamp::now());
        match sink.send(env) {
            Ok(()) => println!("[TX] counter={}", counter),
            Err(e) => eprintln!("[ERROR] send failed: {}", e),
        }
        counter < 100
    })?;

    println!("[OK] Sent {} envelopes", session.metrics().snapshot().envelopes_sent);
    Ok(())
}

fn run_subscriber() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== OD4 Subscriber (CID {}) ===", CID);
    let session = OD4Session::new(CID)?;

    session.add_data_trigger(COUNTER_TYPE, |env: &Envelope| {
        let mut raw = [0u8; 8];
        let n = env.serialized_data.len().min(8);
        raw[..n].copy_from_slice(&env.serialized_data[..n]);
        let latency = env.received.duration_since(env.sent);
        println!(
            "[RX] counter={} from {} latency={:.3} ms",
            u64::from_le_bytes(raw),
            env.sender_stamp,
            latency.as_secs_f64() * 1e3
        );
    });

    // status line every 5 s until Ctrl+C
    loop {
        std::thread::sleep(Duration::from_secs(5));
        let m = session.metrics().snapshot();
        println!(
            "[STATS] delivered={} orphaned={} malformed={}",
            m.envelopes_delivered, m.envelopes_orphaned, m.protocol_errors
        );
    }
}
