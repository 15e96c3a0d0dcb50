// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! od4-echo - print the envelopes exchanged on an OD4 conference.

use chrono::{DateTime, Local};
use clap::Parser;
use colored::*;
use od4::{Envelope, OD4Session, TimeStamp};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// Print every envelope sent on an OD4 conference
#[derive(Parser, Debug)]
#[command(name = "od4-echo")]
#[command(version)]
#[command(about = "Print every envelope sent on an OD4 conference (CID)")]
struct Args {
    /// Conference id (0-255), multicast group 225.0.0.<cid>
    cid: u16,

    /// Only show these data types (repeatable)
    #[arg(short = 't', long = "type")]
    types: Vec<u32>,

    /// Output format: pretty, json, compact, raw
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Shortcut for --format json
    #[arg(long)]
    json: bool,

    /// Shortcut for --format raw
    #[arg(long)]
    raw: bool,

    /// Stop after this many envelopes (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Show sent/sampled timestamps and latency
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Quiet mode - only output data, no headers
    #[arg(short = 'q', long)]
    quiet: bool,
}

#[derive(Clone, Debug, PartialEq)]
enum OutputFormat {
    Pretty,
    Json,
    Compact,
    Raw,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "json" | "j" => Ok(OutputFormat::Json),
            "compact" | "c" => Ok(OutputFormat::Compact),
            "raw" | "r" | "hex" => Ok(OutputFormat::Raw),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.no_color || !is_tty() {
        colored::control::set_override(false);
    }

    let format = if args.json {
        OutputFormat::Json
    } else if args.raw {
        OutputFormat::Raw
    } else {
        args.format.clone()
    };

    if let Err(e) = run_echo(&args, format) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_echo(args: &Args, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    if !args.quiet {
        print_header(args, &format);
    }

    // printing happens on this thread; the receiver thread only forwards
    let (tx, rx) = mpsc::channel::<Envelope>();
    let tx = Mutex::new(tx);
    let wanted = args.types.clone();
    let session = OD4Session::with_delegate(args.cid, move |env: &Envelope| {
        if wanted.is_empty() || wanted.contains(&env.data_type) {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(env.clone());
            }
        }
    })?;

    let mut received = 0u64;
    while running.load(Ordering::SeqCst) && session.is_running() {
        if args.count > 0 && received >= args.count {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(env) => {
                received += 1;
                print_envelope(&env, &format, args.verbose, received);
                let _ = io::stdout().flush();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if !args.quiet {
        let m = session.metrics().snapshot();
        eprintln!(
            "\n{} Received {} envelope(s), {} malformed, {} fragment(s) expired",
            "---".dimmed(),
            received,
            m.protocol_errors,
            m.fragments_expired
        );
    }
    Ok(())
}

fn print_header(args: &Args, format: &OutputFormat) {
    let filter = if args.types.is_empty() {
        "all".to_string()
    } else {
        args.types
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    };
    eprintln!(
        "{} {} {} (group=225.0.0.{}, types={}, format={:?})",
        ">>>".green().bold(),
        "Listening on CID".bold(),
        args.cid.to_string().cyan(),
        args.cid,
        filter,
        format
    );
    eprintln!("{}", "Press Ctrl+C to stop".dimmed());
    eprintln!();
}

/// Local wall-clock rendering; the raw value when chrono cannot represent it.
fn local_time(ts: TimeStamp) -> String {
    let micros = ts.microseconds().clamp(0, 999_999) as u32;
    match DateTime::from_timestamp(ts.seconds(), micros * 1_000) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string(),
        None => ts.to_string(),
    }
}

fn print_envelope(env: &Envelope, format: &OutputFormat, verbose: bool, seq: u64) {
    match format {
        OutputFormat::Pretty => print_pretty(env, verbose, seq),
        OutputFormat::Json => print_json(env, seq),
        OutputFormat::Compact => print_compact(env, seq),
        OutputFormat::Raw => print_raw(env, verbose, seq),
    }
}

fn print_pretty(env: &Envelope, verbose: bool, seq: u64) {
    println!(
        "{} {} type={} stamp={} ({} bytes)",
        format!("[{}]", local_time(env.received)).dimmed(),
        format!("#{}", seq).yellow(),
        env.data_type.to_string().cyan(),
        env.sender_stamp,
        env.serialized_data.len()
    );
    if verbose {
        let latency = env.received.duration_since(env.sent);
        println!(
            "  sent={} sampled={} latency={:.3} ms",
            local_time(env.sent),
            local_time(env.sampled),
            latency.as_secs_f64() * 1e3
        );
    }
    print_payload_preview(&env.serialized_data);
    println!();
}

fn print_json(env: &Envelope, seq: u64) {
    println!(
        r#"{{"seq":{},"data_type":{},"sender_stamp":{},"sent":{:.6},"received":{:.6},"sampled":{:.6},"len":{},"payload":"{}"}}"#,
        seq,
        env.data_type,
        env.sender_stamp,
        env.sent.as_secs_f64(),
        env.received.as_secs_f64(),
        env.sampled.as_secs_f64(),
        env.serialized_data.len(),
        hex(&env.serialized_data)
    );
}

fn print_compact(env: &Envelope, seq: u64) {
    let shown = &env.serialized_data[..env.serialized_data.len().min(32)];
    let suffix = if env.serialized_data.len() > 32 { "..." } else { "" };
    println!(
        "#{} t={} s={}: {}{} ({} bytes)",
        seq,
        env.data_type,
        env.sender_stamp,
        hex(shown),
        suffix,
        env.serialized_data.len()
    );
}

fn print_raw(env: &Envelope, verbose: bool, seq: u64) {
    if verbose {
        println!(
            "{} #{} type={} ({} bytes)",
            format!("[{}]", local_time(env.received)).dimmed(),
            seq,
            env.data_type,
            env.serialized_data.len()
        );
    }
    print_hex_dump(&env.serialized_data);
    println!();
}

fn print_payload_preview(payload: &[u8]) {
    if payload.is_empty() {
        println!("  {}", "(empty)".dimmed());
        return;
    }
    if let Ok(s) = std::str::from_utf8(payload) {
        if s.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            println!("  {}: {}", "text".cyan(), format!("\"{}\"", s).green());
            return;
        }
    }
    let preview: String = payload
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    let suffix = if payload.len() > 16 { " ..." } else { "" };
    println!("  {}: {}{}", "bytes".cyan(), preview, suffix);
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
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

fn is_tty() -> bool {
    #[cfg(unix)]
    // SAFETY: isatty only inspects the descriptor.
    unsafe {
        libc::isatty(libc::STDOUT_FILENO) != 0
    }
    #[cfg(not(unix))]
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_time_out_of_range_falls_back() {
        let ts = TimeStamp::new(i64::MAX / 2, 250);
        assert_eq!(local_time(ts), ts.to_string());
        let ts = TimeStamp::new(i64::MIN / 2, 0);
        assert_eq!(local_time(ts), ts.to_string());
    }

    #[test]
    fn test_local_time_formats_microseconds() {
        let text = local_time(TimeStamp::new(1_700_000_000, 123_456));
        assert!(text.ends_with(".123456"), "{}", text);
    }
}
