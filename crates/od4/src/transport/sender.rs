// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram sender bound to one destination.

use super::{multicast, resolve};
use crate::config::{TransportConfig, MAX_DATAGRAM_SIZE};
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Sends datagrams to a fixed unicast, broadcast or multicast destination.
///
/// The socket is bound to an ephemeral port on all interfaces; that port is
/// exposed through [`UdpSender::send_from_port`] so a co-located
/// [`crate::UdpReceiver`] can ignore what this sender transmits.
#[derive(Debug)]
pub struct UdpSender {
    socket: UdpSocket,
    destination: SocketAddr,
    send_from_port: u16,
}

impl UdpSender {
    /// Sender to `address:port` using [`TransportConfig::from_env`].
    pub fn new(address: &str, port: u16) -> Result<Self> {
        Self::with_config(address, port, &TransportConfig::from_env())
    }

    pub fn with_config(address: &str, port: u16, config: &TransportConfig) -> Result<Self> {
        let destination = resolve(address, port)?;
        let bind_failed = |source| Error::BindFailed {
            addr: destination.to_string(),
            source,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
        if destination.ip().is_multicast() {
            multicast::configure_sender(&socket, config).map_err(bind_failed)?;
        } else if *destination.ip() == Ipv4Addr::BROADCAST {
            socket.set_broadcast(true).map_err(bind_failed)?;
        }
        socket
            .set_write_timeout(Some(config.send_timeout))
            .map_err(bind_failed)?;

        let any = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket.bind(&SocketAddr::V4(any).into()).map_err(bind_failed)?;

        let socket: UdpSocket = socket.into();
        let send_from_port = socket.local_addr().map_err(bind_failed)?.port();
        log::debug!(
            "[UDP] sender to {} from port {}",
            destination,
            send_from_port
        );

        Ok(Self {
            socket,
            destination: SocketAddr::V4(destination),
            send_from_port,
        })
    }

    /// Transmit one datagram; returns the number of bytes sent.
    ///
    /// Payloads above [`MAX_DATAGRAM_SIZE`] are rejected, never truncated.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::PayloadTooLarge {
                size: data.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        self.socket
            .send_to(data, self.destination)
            .map_err(Error::SendFailed)
    }

    /// Local port datagrams leave from.
    pub fn send_from_port(&self) -> u16 {
        self.send_from_port
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}
