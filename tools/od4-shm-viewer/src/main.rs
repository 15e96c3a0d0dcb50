// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! od4-shm-viewer - inspect an OD4 shared memory area.
//!
//! Attaches to the named area, takes its lock, and prints size, timestamp and
//! a hex dump of the data. With `--wait` it keeps printing after every
//! `notify_all` from the producer.

use chrono::{DateTime, Local};
use clap::Parser;
use colored::*;
use od4::{SharedMemory, SharedMemoryGuard, TimeStamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Inspect an OD4 shared memory area
#[derive(Parser, Debug)]
#[command(name = "od4-shm-viewer")]
#[command(version)]
#[command(about = "Inspect an OD4 shared memory area")]
struct Args {
    /// Area name (leading '/' optional)
    name: String,

    /// Bytes of data to dump (0 = whole area)
    #[arg(short, long, default_value = "256")]
    bytes: usize,

    /// Output format: pretty, json
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Keep printing after every notification
    #[arg(short, long)]
    wait: bool,

    /// With --wait, stop after this many updates (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "json" | "j" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// One observation of the area, taken under the lock.
struct Snapshot {
    timestamp: TimeStamp,
    data: Vec<u8>,
}

impl Snapshot {
    fn take(guard: &SharedMemoryGuard<'_>, limit: usize) -> Self {
        let mut data = guard.read_data();
        if limit > 0 {
            data.truncate(limit);
        }
        Self {
            timestamp: guard.timestamp(),
            data,
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let shm = SharedMemory::open(&args.name)?;
    let guard = shm.lock()?;
    print_snapshot(&shm, &Snapshot::take(&guard, args.bytes), args, 0);

    if args.wait {
        let mut updates = 0u64;
        while running.load(Ordering::SeqCst) {
            if args.count > 0 && updates >= args.count {
                break;
            }
            // bounded so Ctrl+C is noticed
            if guard.wait_timeout(Duration::from_millis(200))? {
                updates += 1;
                print_snapshot(&shm, &Snapshot::take(&guard, args.bytes), args, updates);
            }
        }
    }
    guard.unlock()?;
    Ok(())
}

/// Local wall-clock rendering; the raw value when chrono cannot represent it.
fn local_time(ts: TimeStamp) -> String {
    if ts.is_unset() {
        return "unset".to_string();
    }
    let micros = ts.microseconds().clamp(0, 999_999) as u32;
    match DateTime::from_timestamp(ts.seconds(), micros * 1_000) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string(),
        None => ts.to_string(),
    }
}

fn print_snapshot(shm: &SharedMemory, snap: &Snapshot, args: &Args, update: u64) {
    match args.format {
        OutputFormat::Pretty => print_pretty(shm, snap, update),
        OutputFormat::Json => print_json(shm, snap, update),
    }
}

fn print_pretty(shm: &SharedMemory, snap: &Snapshot, update: u64) {
    let title = if update == 0 {
        "Shared memory".to_string()
    } else {
        format!("Update #{}", update)
    };
    println!("{} {}", "===".cyan().bold(), title.bold());
    println!("  {:<10} {}", "name".dimmed(), shm.name().green());
    println!("  {:<10} {} bytes", "size".dimmed(), shm.size());
    println!(
        "  {:<10} {} ({}.{:06})",
        "timestamp".dimmed(),
        local_time(snap.timestamp).yellow(),
        snap.timestamp.seconds(),
        snap.timestamp.microseconds()
    );
    println!();
    print_hex_dump(&snap.data);
    if snap.data.len() < shm.size() {
        println!(
            "  {}",
            format!("... {} more bytes", shm.size() - snap.data.len()).dimmed()
        );
    }
    println!();
}

fn print_json(shm: &SharedMemory, snap: &Snapshot, update: u64) {
    let hex: String = snap.data.iter().map(|b| format!("{:02x}", b)).collect();
    println!(
        r#"{{"update":{},"name":"{}","size":{},"timestamp":{:.6},"data":"{}"}}"#,
        update,
        shm.name(),
        shm.size(),
        snap.timestamp.as_secs_f64(),
        hex
    );
}

fn print_hex_dump(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        print!("  {:04x}  ", i * 16);
        for (j, byte) in chunk.iter().enumerate() {
            if j == 8 {
                print!(" ");
            }
            print!("{:02x} ", byte);
        }
        for j in chunk.len()..16 {
            if j == 8 {
                print!(" ");
            }
            print!("   ");
        }
        print!(" |");
        for byte in chunk {
            print!(
                "{}",
                if (0x20..0x7f).contains(byte) {
                    *byte as char
                } else {
                    '.'
                }
            );
        }
        println!("|");
    }
}
