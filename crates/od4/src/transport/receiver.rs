// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background datagram receiver.
//!
//! # Architecture
//!
//! ```text
//! mio::poll() -> recv_from(buf) -> own-datagram filter -> handler(payload, from, ts)
//!      ^
//!      +-- Waker (drop)
//! ```
//!
//! The socket is drained completely on every readiness event. The handler runs
//! on the receiver thread behind a panic boundary, so a failing handler costs
//! one datagram, never the loop.

use super::{multicast, resolve};
use crate::config::{TransportConfig, POLL_INTERVAL, RECV_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::metrics::ReceiverMetrics;
use crate::time::TimeStamp;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

const SOCKET_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// Callback for every received datagram.
pub trait DatagramHandler: Send + Sync + 'static {
    fn on_datagram(&self, payload: &[u8], from: SocketAddr, received: TimeStamp);
}

impl<F> DatagramHandler for F
where
    F: Fn(&[u8], SocketAddr, TimeStamp) + Send + Sync + 'static,
{
    fn on_datagram(&self, payload: &[u8], from: SocketAddr, received: TimeStamp) {
        self(payload, from, received);
    }
}

/// Datagrams sent by this host from `port` are dropped.
struct OwnSenderFilter {
    port: u16,
    local_addrs: Vec<IpAddr>,
}

impl OwnSenderFilter {
    fn new(port: u16) -> Self {
        let local_addrs = if port == 0 {
            Vec::new()
        } else {
            multicast::local_addresses()
        };
        Self { port, local_addrs }
    }

    fn is_own(&self, from: &SocketAddr) -> bool {
        self.port != 0 && from.port() == self.port && self.local_addrs.contains(&from.ip())
    }
}

/// Receives datagrams on `address:port` and hands each one to a handler.
///
/// The receive loop starts in [`UdpReceiver::new`] and stops when the value
/// is dropped or the socket fails.
pub struct UdpReceiver {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    metrics: Arc<ReceiverMetrics>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl UdpReceiver {
    /// Receiver using [`TransportConfig::from_env`].
    ///
    /// Joins the multicast group when `address` is one. Datagrams coming from
    /// a local address with source port `local_send_from_port` are ignored;
    /// pass `0` to receive everything.
    pub fn new<H: DatagramHandler>(
        address: &str,
        port: u16,
        handler: H,
        local_send_from_port: u16,
    ) -> Result<Self> {
        Self::with_config(
            address,
            port,
            handler,
            local_send_from_port,
            &TransportConfig::from_env(),
        )
    }

    pub fn with_config<H: DatagramHandler>(
        address: &str,
        port: u16,
        handler: H,
        local_send_from_port: u16,
        config: &TransportConfig,
    ) -> Result<Self> {
        let target = resolve(address, port)?;
        let socket = open_socket(target, config)?;
        let local_addr = socket.local_addr().map_err(|source| Error::BindFailed {
            addr: target.to_string(),
            source,
        })?;

        let poll = Poll::new().map_err(Error::ThreadSpawn)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).map_err(Error::ThreadSpawn)?);
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(ReceiverMetrics::new());

        let worker = ReceiveLoop {
            poll,
            socket: mio::net::UdpSocket::from_std(socket),
            running: Arc::clone(&running),
            metrics: Arc::clone(&metrics),
            handler: Box::new(handler),
            filter: OwnSenderFilter::new(local_send_from_port),
        };

        let handle = thread::Builder::new()
            .name("od4-udp-rx".to_string())
            .spawn(move || worker.run())
            .map_err(Error::ThreadSpawn)?;
        let thread_id = handle.thread().id();

        log::debug!(
            "[UDP] receiver on {} (ignoring own port {})",
            local_addr,
            local_send_from_port
        );

        Ok(Self {
            local_addr,
            running,
            waker,
            metrics,
            handle: Some(handle),
            thread_id,
        })
    }

    /// `true` while the receive loop is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> &ReceiverMetrics {
        &self.metrics
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// When called from the handler itself the loop is only signalled.
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

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for UdpReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpReceiver")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Bind (and join, for multicast) the receive socket.
fn open_socket(target: SocketAddrV4, config: &TransportConfig) -> Result<UdpSocket> {
    let is_multicast = target.ip().is_multicast();
    let bind_failed = |source| Error::BindFailed {
        addr: target.to_string(),
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    #[cfg(unix)]
    if is_multicast {
        multicast::set_reuseport(&socket).map_err(bind_failed)?;
    }
    let _ = socket.set_recv_buffer_size(RECV_BUFFER_SIZE * 4);

    // binding the group address keeps other groups on the same port out;
    // Windows only accepts a local address here
    let bind_ip = if is_multicast && cfg!(unix) {
        *target.ip()
    } else if is_multicast {
        Ipv4Addr::UNSPECIFIED
    } else {
        *target.ip()
    };
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(bind_ip, target.port()));
    socket.bind(&bind_addr.into()).map_err(bind_failed)?;

    if is_multicast {
        multicast::join_group(&socket, *target.ip(), config).map_err(|source| {
            Error::MulticastJoinFailed {
                group: target.ip().to_string(),
                source,
            }
        })?;
    }

    socket.set_nonblocking(true).map_err(bind_failed)?;
    Ok(socket.into())
}

/// State moved onto the receiver thread.
struct ReceiveLoop {
    poll: Poll,
    socket: mio::net::UdpSocket,
    running: Arc<AtomicBool>,
    metrics: Arc<ReceiverMetrics>,
    handler: Box<dyn DatagramHandler>,
    filter: OwnSenderFilter,
}

impl ReceiveLoop {
    fn run(mut self) {
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut self.socket, SOCKET_TOKEN, Interest::READABLE)
        {
            log::error!("[UDP] Failed to register socket with poll: {}", e);
            self.running.store(false, Ordering::Release);
            return;
        }

        let mut events = Events::with_capacity(16);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_INTERVAL)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::warn!("[UDP] poll failed, stopping receiver: {}", e);
                break;
            }

            for event in events.iter() {
                if event.token() == SOCKET_TOKEN && !self.drain(&mut buf) {
                    self.running.store(false, Ordering::Release);
                }
            }
        }

        self.running.store(false, Ordering::Release);
        log::debug!("[UDP] receiver thread exiting");
    }

    /// Read until `WouldBlock`. Returns `false` on an unrecoverable socket error.
    fn drain(&self, buf: &mut [u8]) -> bool {
        loop {
            let (len, from) = match self.socket.recv_from(buf) {
                Ok(result) => result,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // ICMP port unreachable from an earlier send; the socket is fine
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    self.metrics.record_recv_error();
                    continue;
                }
                Err(e) => {
                    self.metrics.record_recv_error();
                    log::warn!("[UDP] recv_from failed: {}", e);
                    return false;
                }
            };
            let received = TimeStamp::now();

            if self.filter.is_own(&from) {
                self.metrics.record_own_datagram();
                continue;
            }
            self.metrics.record_datagram(len);

            let payload = &buf[..len];
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.handler.on_datagram(payload, from, received);
            }));
            if result.is_err() {
                self.metrics.record_handler_panic();
                log::warn!("[UDP] datagram handler panicked ({} bytes from {})", len, from);
            }
        }
    }
}
