// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP byte-stream transport.
//!
//! - [`TcpConnection`] - one stream, one reader thread, raw chunks to `on_data`
//! - [`TcpServer`] - accept loop handing each client to `on_new_connection`
//!
//! ```no_run
//! use od4::{TcpConnection, TcpServer, TimeStamp};
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! let _server = TcpServer::bind(4567, |from: SocketAddr, conn: Arc<TcpConnection>| {
//!     println!("client {}", from);
//!     conn.set_on_data(|data: &[u8], _ts: TimeStamp| println!("{} bytes", data.len()));
//! })
//! .unwrap();
//!
//! let client = TcpConnection::connect(
//!     "127.0.0.1",
//!     4567,
//!     |_: &[u8], _: TimeStamp| {},
//!     || println!("lost"),
//! )
//! .unwrap();
//! client.send(b"hello").unwrap();
//! ```

mod connection;
mod server;

pub use connection::TcpConnection;
pub use server::TcpServer;

use crate::time::TimeStamp;
use std::net::SocketAddr;
use std::sync::Arc;

/// Receives raw stream chunks.
pub trait TcpDataHandler: Send + Sync + 'static {
    fn on_data(&self, data: &[u8], received: TimeStamp);
}

impl<F> TcpDataHandler for F
where
    F: Fn(&[u8], TimeStamp) + Send + Sync + 'static,
{
    fn on_data(&self, data: &[u8], received: TimeStamp) {
        self(data, received);
    }
}

/// Invoked once when the peer goes away or the stream fails.
pub trait ConnectionLostHandler: Send + Sync + 'static {
    fn on_connection_lost(&self);
}

impl<F> ConnectionLostHandler for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn on_connection_lost(&self) {
        self();
    }
}

/// Invoked once per accepted client, before its reader starts.
pub trait NewConnectionHandler: Send + Sync + 'static {
    fn on_new_connection(&self, remote: SocketAddr, connection: Arc<TcpConnection>);
}

impl<F> NewConnectionHandler for F
where
    F: Fn(SocketAddr, Arc<TcpConnection>) + Send + Sync + 'static,
{
    fn on_new_connection(&self, remote: SocketAddr, connection: Arc<TcpConnection>) {
        self(remote, connection);
    }
}
