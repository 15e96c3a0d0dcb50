// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast group membership, socket options and local interface discovery.

use crate::config::TransportConfig;
use socket2::Socket;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

/// Join `group` on the configured interface, or on every local IPv4 interface.
///
/// Without a configured interface, per-interface failures are skipped and
/// the kernel's default interface is used when no join succeeds.
pub(crate) fn join_group(socket: &Socket, group: Ipv4Addr, config: &TransportConfig) -> io::Result<()> {
    if let Some(iface) = config.interface {
        join_on(socket, group, iface)?;
    } else {
        let mut joined = 0;
        for iface in join_interfaces(config) {
            match join_on(socket, group, iface) {
                Ok(()) => joined += 1,
                Err(e) => {
                    log::debug!("[UDP] join_multicast_v4({}) on {} failed (non-fatal): {}", group, iface, e);
                }
            }
        }
        if joined == 0 {
            log::debug!("[UDP] no interface joined {}, using UNSPECIFIED", group);
            join_on(socket, group, Ipv4Addr::UNSPECIFIED)?;
        }
    }
    socket.set_multicast_loop_v4(config.multicast_loop)?;
    Ok(())
}

fn join_on(socket: &Socket, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    match socket.join_multicast_v4(&group, &iface) {
        Ok(()) => {
            log::debug!("[UDP] join_multicast_v4({}) on {}", group, iface);
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(libc::EADDRINUSE) => {
            // already a member on this NIC
            log::debug!("[UDP] join_multicast_v4({}) on {} - already joined", group, iface);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Interfaces a receiver joins on: the configured one, else every
/// non-loopback local IPv4 address.
pub(crate) fn join_interfaces(config: &TransportConfig) -> Vec<Ipv4Addr> {
    if let Some(iface) = config.interface {
        return vec![iface];
    }
    let mut interfaces = Vec::new();
    match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => {
            for (_name, ip) in ifs {
                if let IpAddr::V4(v4) = ip {
                    if !v4.is_loopback() && !interfaces.contains(&v4) {
                        interfaces.push(v4);
                    }
                }
            }
        }
        Err(e) => {
            log::debug!("[UDP] Failed to list network interfaces: {}", e);
        }
    }
    interfaces
}

/// Outgoing multicast options: hop limit, loopback and interface.
pub(crate) fn configure_sender(socket: &Socket, config: &TransportConfig) -> io::Result<()> {
    socket.set_multicast_ttl_v4(u32::from(config.multicast_ttl))?;
    socket.set_multicast_loop_v4(config.multicast_loop)?;
    if let Some(iface) = config.interface {
        socket.set_multicast_if_v4(&iface)?;
    }
    log::debug!(
        "[UDP] multicast ttl={} loop={} if={:?}",
        config.multicast_ttl,
        config.multicast_loop,
        config.interface
    );
    Ok(())
}

/// Enable `SO_REUSEPORT` so several processes can bind the same conference port.
#[cfg(unix)]
pub(crate) fn set_reuseport(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: setsockopt FFI with valid fd, standard socket option, and correctly sized optval pointer
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Every address of this host, loopback included.
///
/// Used to recognise datagrams this process sent to itself.
pub(crate) fn local_addresses() -> Vec<IpAddr> {
    let mut addrs = vec![
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
    ];
    match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => {
            for (_name, ip) in ifs {
                if !addrs.contains(&ip) {
                    addrs.push(ip);
                }
            }
        }
        Err(e) => {
            log::debug!("[UDP] Failed to list network interfaces: {}", e);
        }
    }
    log::debug!("[UDP] {} local addresses for own-datagram filtering", addrs.len());
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Protocol, Type};

    #[test]
    fn test_local_addresses_include_loopback() {
        let addrs = local_addresses();
        assert!(addrs.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_join_interfaces_skip_loopback() {
        let interfaces = join_interfaces(&TransportConfig::default());
        assert!(interfaces.iter().all(|ip| !ip.is_loopback()));
        let mut unique = interfaces.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), interfaces.len());
    }

    #[test]
    fn test_join_interfaces_prefers_configured() {
        let cfg = TransportConfig::default().with_interface(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(join_interfaces(&cfg), vec![Ipv4Addr::new(10, 1, 2, 3)]);
    }

    #[test]
    fn test_configure_sender_applies_ttl() {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        let cfg = TransportConfig::default().with_multicast_ttl(16);
        configure_sender(&socket, &cfg).unwrap();
        assert_eq!(socket.multicast_ttl_v4().unwrap(), 16);
        assert!(socket.multicast_loop_v4().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_reuseport_allows_double_bind() {
        let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        a.set_reuse_address(true).unwrap();
        set_reuseport(&a).unwrap();
        a.bind(&addr.into()).unwrap();
        let port = a.local_addr().unwrap().as_socket().unwrap().port();

        let b = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        b.set_reuse_address(true).unwrap();
        set_reuseport(&b).unwrap();
        let same: std::net::SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        assert!(b.bind(&same.into()).is_ok());
    }
}
