// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw UDP and TCP transports.
//!
//! # Modules
//!
//! - `sender` - [`UdpSender`], datagrams to one unicast/broadcast/multicast destination
//! - `receiver` - [`UdpReceiver`], background receive loop with per-datagram handler
//! - `multicast` - group membership, socket options and local interface discovery
//! - `tcp` - [`TcpConnection`] and [`TcpServer`]
//!
//! # Example
//!
//! ```no_run
//! use od4::{TimeStamp, UdpReceiver, UdpSender};
//! use std::net::SocketAddr;
//!
//! let receiver = UdpReceiver::new(
//!     "127.0.0.1",
//!     1234,
//!     |data: &[u8], from: SocketAddr, _ts: TimeStamp| println!("{} bytes from {}", data.len(), from),
//!     0,
//! )
//! .unwrap();
//!
//! let sender = UdpSender::new("127.0.0.1", 1234).unwrap();
//! sender.send(b"hello").unwrap();
//! # drop(receiver);
//! ```

mod multicast;
mod receiver;
mod sender;
/// Byte-stream connections and accept loop.
pub mod tcp;

pub use receiver::{DatagramHandler, UdpReceiver};
pub use sender::UdpSender;
pub use tcp::{ConnectionLostHandler, NewConnectionHandler, TcpConnection, TcpDataHandler, TcpServer};

use crate::error::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// Resolve `address` (dotted quad or host name) to an IPv4 socket address.
pub(crate) fn resolve(address: &str, port: u16) -> Result<SocketAddrV4> {
    if let Ok(ip) = address.trim().parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, port));
    }
    let candidates = (address.trim(), port)
        .to_socket_addrs()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    candidates
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_dotted_quad() {
        assert_eq!(
            resolve("225.0.0.80", 12175).unwrap(),
            SocketAddrV4::new(Ipv4Addr::new(225, 0, 0, 80), 12175)
        );
    }

    #[test]
    fn test_resolve_localhost_name() {
        let addr = resolve("localhost", 80).unwrap();
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_resolve_garbage() {
        assert!(matches!(
            resolve("not an address", 1),
            Err(Error::InvalidAddress(_))
        ));
    }
}
