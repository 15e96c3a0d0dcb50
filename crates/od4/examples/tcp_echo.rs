// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP Envelope Echo Example
//!
//! Starts a `TcpServer` that decodes envelopes from each client and sends
//! them back with an incremented sender stamp, then connects a client to it.
//!
//! ```bash
//! cargo run --example tcp_echo
//! ```

use od4::codec::{serialize, FrameDecoder};
use od4::{Envelope, TcpConnection, TcpServer, TimeStamp};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Weak};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== OD4 TCP Echo ===");

    let clients: Arc<Mutex<Vec<Arc<TcpConnection>>>> = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::clone(&clients);
    let server = TcpServer::bind_on("127.0.0.1", 0, move |remote: SocketAddr, conn: Arc<TcpConnection>| {
        println!("[SERVER] client {}", remote);
        let decoder = Mutex::new(FrameDecoder::new());
        // the handler lives inside the connection; a strong ref would leak it
        let reply: Weak<TcpConnection> = Arc::downgrade(&conn);
        conn.set_on_data(move |chunk: &[u8], _ts: TimeStamp| {
            let mut decoder = decoder.lock();
            decoder.push(chunk);
            while let Some(next) = decoder.next_envelope() {
                let Ok(mut env) = next else { continue };
                env.sender_stamp += 1;
                if let (Some(conn), Ok(bytes)) = (reply.upgrade(), serialize(&env)) {
                    let _ = conn.send(&bytes);
                }
            }
        });
        conn.set_on_connection_lost(move || println!("[SERVER] client {} left", remote));
        registry.lock().push(conn);
    })?;
    println!("[OK] Listening on {}", server.local_addr());

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let decoder = Mutex::new(FrameDecoder::new());
    let client = TcpConnection::connect(
        "127.0.0.1",
        server.local_addr().port(),
        move |chunk: &[u8], _ts: TimeStamp| {
            let mut decoder = decoder.lock();
            decoder.push(chunk);
            while let Some(Ok(env)) = decoder.next_envelope() {
                let _ = tx.lock().send(env);
            }
        },
        || println!("[CLIENT] connection lost"),
    )?;

    for i in 0..5u32 {
        let env = Envelope::new(42, format!("ping {}", i).into_bytes()).with_sender_stamp(i * 10);
        client.send(&serialize(&env)?)?;
        let echoed = rx.recv_timeout(Duration::from_secs(1))?;
        println!(
            "[CLIENT] echo: {:?} stamp {} -> {}",
            String::from_utf8_lossy(&echoed.serialized_data),
            i * 10,
            echoed.sender_stamp
        );
    }

    client.close();
    println!("[OK] Done, server saw {} client(s)", clients.lock().len());
    Ok(())
}
