// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Accept loop.

use super::{NewConnectionHandler, TcpConnection};
use crate::config::POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::transport::resolve;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// Listens on a port and turns every client into a [`TcpConnection`].
///
/// `on_new_connection` runs exactly once per client on the accept thread.
/// That is where the application installs the connection's handlers; the
/// connection starts reading only after the callback returns.
pub struct TcpServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl TcpServer {
    /// Listen on `0.0.0.0:port`. Port `0` picks a free port, see [`TcpServer::local_addr`].
    pub fn bind<H: NewConnectionHandler>(port: u16, on_new_connection: H) -> Result<Self> {
        Self::bind_on("0.0.0.0", port, on_new_connection)
    }

    pub fn bind_on<H: NewConnectionHandler>(
        address: &str,
        port: u16,
        on_new_connection: H,
    ) -> Result<Self> {
        let addr = SocketAddr::V4(resolve(address, port)?);
        let bind_failed = |source| Error::BindFailed {
            addr: addr.to_string(),
            source,
        };

        let listener = TcpListener::bind(addr).map_err(bind_failed)?;
        listener.set_nonblocking(true).map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;
        // readiness is watched on a clone; accept() stays on the std listener
        let watched = mio::net::TcpListener::from_std(listener.try_clone().map_err(bind_failed)?);

        let poll = Poll::new().map_err(Error::ThreadSpawn)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).map_err(Error::ThreadSpawn)?);
        let running = Arc::new(AtomicBool::new(true));

        let worker = AcceptLoop {
            poll,
            listener,
            watched,
            running: Arc::clone(&running),
            handler: Box::new(on_new_connection),
        };
        let handle = thread::Builder::new()
            .name("od4-tcp-accept".to_string())
            .spawn(move || worker.run())
            .map_err(Error::ThreadSpawn)?;
        let thread_id = handle.thread().id();

        log::debug!("[TCP] server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            running,
            waker,
            handle: Some(handle),
            thread_id,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting. Connections already handed out stay open.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.waker.wake();
        if let Some(handle) = self.handle.take() {
            if thread::current().id() != self.thread_id {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

struct AcceptLoop {
    poll: Poll,
    listener: TcpListener,
    watched: mio::net::TcpListener,
    running: Arc<AtomicBool>,
    handler: Box<dyn NewConnectionHandler>,
}

impl AcceptLoop {
    fn run(mut self) {
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut self.watched, LISTENER_TOKEN, Interest::READABLE)
        {
            log::error!("[TCP] Failed to register listener with poll: {}", e);
            self.running.store(false, Ordering::Release);
            return;
        }

        let mut events = Events::with_capacity(8);
        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_INTERVAL)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::warn!("[TCP] poll failed, stopping server: {}", e);
                break;
            }
            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    self.accept_pending();
                }
            }
        }
        self.running.store(false, Ordering::Release);
        log::debug!("[TCP] accept thread exiting");
    }

    fn accept_pending(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, remote)) => self.admit(stream, remote),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("[TCP] accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn admit(&self, stream: std::net::TcpStream, remote: SocketAddr) {
        // BSD-derived stacks inherit O_NONBLOCK from the listener
        if let Err(e) = stream.set_nonblocking(false) {
            log::warn!("[TCP] dropping client {}: {}", remote, e);
            return;
        }
        let connection = match TcpConnection::from_stream(stream, remote) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[TCP] dropping client {}: {}", remote, e);
                return;
            }
        };
        log::debug!("[TCP] accepted {}", remote);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handler
                .on_new_connection(remote, Arc::clone(&connection));
        }));
        if result.is_err() {
            log::warn!("[TCP] new-connection handler panicked for {}", remote);
            connection.close();
            return;
        }
        if let Err(e) = connection.start() {
            log::warn!("[TCP] cannot start reader for {}: {}", remote, e);
            connection.close();
        }
    }
}
