// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TcpServer / TcpConnection on loopback, with envelopes framed over the
//! stream and reassembled by `FrameDecoder`.

use od4::codec::{serialize, FrameDecoder};
use od4::{Envelope, TcpConnection, TcpServer, TimeStamp};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Server that decodes every client stream into envelopes.
fn decoding_server() -> (TcpServer, mpsc::Receiver<Envelope>, Arc<Mutex<Vec<Arc<TcpConnection>>>>) {
    let (tx, rx) = mpsc::channel();
    let clients = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::clone(&clients);
    let tx = Mutex::new(tx);

    let server = TcpServer::bind_on(
        "127.0.0.1",
        0,
        move |_remote: SocketAddr, conn: Arc<TcpConnection>| {
            let decoder = Mutex::new(FrameDecoder::new());
            let tx = tx.lock().clone();
            let tx = Mutex::new(tx);
            conn.set_on_data(move |chunk: &[u8], _ts: TimeStamp| {
                let mut decoder = decoder.lock();
                decoder.push(chunk);
                while let Some(Ok(env)) = decoder.next_envelope() {
                    let _ = tx.lock().send(env);
                }
            });
            registry.lock().push(conn);
        },
    )
    .expect("bind server");
    (server, rx, clients)
}

#[test]
fn test_envelopes_reassembled_across_chunks() {
    let (server, rx, _clients) = decoding_server();
    let client = TcpConnection::connect(
        "127.0.0.1",
        server.local_addr().port(),
        |_: &[u8], _: TimeStamp| {},
        || {},
    )
    .unwrap();

    let envelopes: Vec<Envelope> = (0..3)
        .map(|i| Envelope::new(100 + i, vec![i as u8; 10 * (i as usize + 1)]).with_sender_stamp(i))
        .collect();
    let mut stream = Vec::new();
    for env in &envelopes {
        stream.extend(serialize(env).unwrap());
    }

    // odd chunk size so frame headers straddle writes
    for chunk in stream.chunks(7) {
        client.send(chunk).unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }

    for expected in &envelopes {
        let got = rx.recv_timeout(TIMEOUT).expect("envelope");
        assert_eq!(&got, expected);
    }
}

#[test]
fn test_server_sees_every_client() {
    let (server, _rx, clients) = decoding_server();
    let port = server.local_addr().port();

    let connections: Vec<_> = (0..4)
        .map(|_| TcpConnection::connect("127.0.0.1", port, |_: &[u8], _: TimeStamp| {}, || {}).unwrap())
        .collect();

    assert!(wait_until(|| clients.lock().len() == 4));
    for server_side in clients.lock().iter() {
        assert!(server_side.is_running());
        assert!(server_side.remote_ip().is_loopback());
    }
    assert!(connections.iter().all(|c| c.remote_port() == port));
}

#[test]
fn test_fan_out_to_all_clients() {
    let (server, _rx, clients) = decoding_server();
    let port = server.local_addr().port();

    let received = Arc::new(AtomicUsize::new(0));
    let connections: Vec<_> = (0..3)
        .map(|_| {
            let received = Arc::clone(&received);
            TcpConnection::connect(
                "127.0.0.1",
                port,
                move |data: &[u8], _: TimeStamp| {
                    received.fetch_add(data.len(), Ordering::SeqCst);
                },
                || {},
            )
            .unwrap()
        })
        .collect();
    assert!(wait_until(|| clients.lock().len() == 3));

    for conn in clients.lock().iter() {
        conn.send(b"broadcast").unwrap();
    }
    assert!(wait_until(|| received.load(Ordering::SeqCst) == 3 * 9));
    drop(connections);
}

#[test]
fn test_peer_close_fires_connection_lost_once() {
    let (server, _rx, clients) = decoding_server();
    let (lost_tx, lost_rx) = mpsc::channel();
    let lost_tx = Mutex::new(lost_tx);

    let client = TcpConnection::connect(
        "127.0.0.1",
        server.local_addr().port(),
        |_: &[u8], _: TimeStamp| {},
        move || {
            let _ = lost_tx.lock().send(());
        },
    )
    .unwrap();
    assert!(wait_until(|| clients.lock().len() == 1));

    // server side goes away
    let server_side = clients.lock().pop().unwrap();
    server_side.close();
    drop(server_side);

    lost_rx.recv_timeout(TIMEOUT).expect("connection lost");
    assert!(lost_rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(!client.is_running());
    assert!(client.send(b"late").is_err());
}

#[test]
fn test_local_close_is_not_a_loss() {
    let (server, _rx, _clients) = decoding_server();
    let lost = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lost);

    let client = TcpConnection::connect(
        "127.0.0.1",
        server.local_addr().port(),
        |_: &[u8], _: TimeStamp| {},
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();
    client.close();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(lost.load(Ordering::SeqCst), 0);
}

#[test]
fn test_connect_refused() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .unwrap()
        .port();
    let err = TcpConnection::connect("127.0.0.1", port, |_: &[u8], _: TimeStamp| {}, || {})
        .unwrap_err();
    assert!(matches!(err, od4::Error::ConnectFailed { .. }));
}
