// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stream connection with a background reader.
//!
//! # Lifecycle
//!
//! ```text
//!   connect() / accept --> Created --start()--> Running --EOF / I/O error--> Lost
//!                                                  |                (on_connection_lost, once)
//!                                                  +--close() / drop--> Closed
//!                                                                   (no callback)
//! ```
//!
//! Reads use a short socket timeout so the reader notices `close()` even when
//! the shutdown cannot interrupt a blocking read on the platform.

use super::{ConnectionLostHandler, TcpDataHandler};
use crate::config::{DEFAULT_SEND_TIMEOUT, TCP_READ_CHUNK, TCP_READ_TIMEOUT};
use crate::error::{Error, Result};
use crate::metrics::ConnectionMetrics;
use crate::time::TimeStamp;
use crate::transport::resolve;
use parking_lot::{Mutex, RwLock};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// State shared between the owner and the reader thread.
struct Shared {
    stream: TcpStream,
    remote: SocketAddr,
    running: AtomicBool,
    lost_notified: AtomicBool,
    on_data: RwLock<Option<Arc<dyn TcpDataHandler>>>,
    on_lost: RwLock<Option<Arc<dyn ConnectionLostHandler>>>,
    write_lock: Mutex<()>,
    metrics: ConnectionMetrics,
}

impl Shared {
    fn deliver(&self, data: &[u8], received: TimeStamp) {
        self.metrics.record_chunk(data.len());
        let handler = self.on_data.read().clone();
        let Some(handler) = handler else {
            log::trace!("[TCP] {} bytes from {} with no data handler", data.len(), self.remote);
            return;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler.on_data(data, received);
        }));
        if result.is_err() {
            self.metrics.record_handler_panic();
            log::warn!("[TCP] data handler for {} panicked", self.remote);
        }
    }

    fn notify_lost(&self) {
        if self.lost_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        let handler = self.on_lost.read().clone();
        if let Some(handler) = handler {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler.on_connection_lost();
            }));
            if result.is_err() {
                self.metrics.record_handler_panic();
                log::warn!("[TCP] connection-lost handler for {} panicked", self.remote);
            }
        }
    }
}

fn read_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; TCP_READ_CHUNK];
    let lost = loop {
        if !shared.running.load(Ordering::Acquire) {
            break false;
        }
        match (&shared.stream).read(&mut buf) {
            Ok(0) => {
                log::debug!("[TCP] {} closed the connection", shared.remote);
                break true;
            }
            Ok(n) => shared.deliver(&buf[..n], TimeStamp::now()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                log::debug!("[TCP] read from {} failed: {}", shared.remote, e);
                break true;
            }
        }
    };

    // a concurrent close() already cleared the flag; that is not a loss
    if lost && shared.running.swap(false, Ordering::AcqRel) {
        shared.notify_lost();
    }
    log::debug!("[TCP] reader for {} exiting", shared.remote);
}

/// A TCP byte stream. No framing is imposed: `on_data` sees chunks as the OS
/// delivers them.
///
/// Shared as `Arc<TcpConnection>`; dropping the last reference closes the
/// socket and joins the reader.
pub struct TcpConnection {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpConnection {
    /// Connect to `address:port` and start reading.
    ///
    /// `on_data(bytes, timestamp)` runs for every received chunk and
    /// `on_connection_lost()` once when the peer disconnects or the stream
    /// fails. A failed connect returns [`Error::ConnectFailed`].
    pub fn connect<D, L>(address: &str, port: u16, on_data: D, on_connection_lost: L) -> Result<Arc<Self>>
    where
        D: TcpDataHandler,
        L: ConnectionLostHandler,
    {
        let target = SocketAddr::V4(resolve(address, port)?);
        let stream = TcpStream::connect(target).map_err(|source| Error::ConnectFailed {
            addr: target.to_string(),
            source,
        })?;
        let connection = Self::from_stream(stream, target)?;
        connection.set_on_data(on_data);
        connection.set_on_connection_lost(on_connection_lost);
        connection.start()?;
        log::debug!("[TCP] connected to {}", target);
        Ok(connection)
    }

    /// Wrap an established stream without starting the reader.
    pub(crate) fn from_stream(stream: TcpStream, remote: SocketAddr) -> Result<Arc<Self>> {
        let configure = |stream: &TcpStream| -> io::Result<()> {
            stream.set_nodelay(true)?;
            stream.set_read_timeout(Some(TCP_READ_TIMEOUT))?;
            stream.set_write_timeout(Some(DEFAULT_SEND_TIMEOUT))?;
            Ok(())
        };
        configure(&stream).map_err(|source| Error::ConnectFailed {
            addr: remote.to_string(),
            source,
        })?;

        Ok(Arc::new(Self {
            shared: Arc::new(Shared {
                stream,
                remote,
                running: AtomicBool::new(true),
                lost_notified: AtomicBool::new(false),
                on_data: RwLock::new(None),
                on_lost: RwLock::new(None),
                write_lock: Mutex::new(()),
                metrics: ConnectionMetrics::new(),
            }),
            reader: Mutex::new(None),
        }))
    }

    /// Spawn the reader thread. No-op when already started or closed.
    pub(crate) fn start(&self) -> Result<()> {
        let mut reader = self.reader.lock();
        if reader.is_some() || !self.is_running() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("od4-tcp-conn".to_string())
            .spawn(move || read_loop(shared))
            .map_err(Error::ThreadSpawn)?;
        *reader = Some(handle);
        Ok(())
    }

    /// Replace the data handler.
    pub fn set_on_data<D: TcpDataHandler>(&self, handler: D) {
        *self.shared.on_data.write() = Some(Arc::new(handler));
    }

    /// Replace the connection-lost handler.
    pub fn set_on_connection_lost<L: ConnectionLostHandler>(&self, handler: L) {
        *self.shared.on_lost.write() = Some(Arc::new(handler));
    }

    /// Write all of `data`; returns its length.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        let _guard = self.shared.write_lock.lock();
        match (&self.shared.stream).write_all(data) {
            Ok(()) => {
                self.shared.metrics.record_sent(data.len());
                Ok(data.len())
            }
            Err(e) => {
                self.shared.metrics.record_send_error();
                Err(Error::SendFailed(e))
            }
        }
    }

    /// `true` until closed locally, lost, or dropped.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    pub fn remote_ip(&self) -> std::net::IpAddr {
        self.shared.remote.ip()
    }

    pub fn remote_port(&self) -> u16 {
        self.shared.remote.port()
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.shared.metrics
    }

    /// Close the socket and stop the reader. `on_connection_lost` is not
    /// invoked for a local close.
    pub fn close(&self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = self.shared.stream.shutdown(Shutdown::Both);
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("remote", &self.shared.remote)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
