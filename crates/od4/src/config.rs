// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OD4 constants and transport configuration.
//!
//! Every port, address prefix, buffer size and timeout used by the transports
//! lives here. Socket tuning that operators may want to change at deploy time
//! is carried by [`TransportConfig`], which reads `OD4_*` environment
//! variables in [`TransportConfig::from_env`].
//!
//! # Environment Variables
//!
//! | Variable              | Effect                                        |
//! |-----------------------|-----------------------------------------------|
//! | `OD4_MULTICAST_IF`    | IPv4 of the interface used to join and send   |
//! | `OD4_MULTICAST_TTL`   | Multicast hop limit (1-255)                   |
//! | `OD4_MULTICAST_LOOP`  | `0` disables local loopback of own datagrams  |
//! | `OD4_SEND_TIMEOUT_MS` | Socket send timeout in milliseconds           |

use std::net::Ipv4Addr;
use std::time::Duration;

// =======================================================================
// Conference addressing
// =======================================================================

/// UDP port shared by every OD4 conference.
pub const OD4_PORT: u16 = 12175;

/// First three octets of a conference's multicast group; the CID is the last.
pub const OD4_MULTICAST_PREFIX: [u8; 3] = [225, 0, 0];

/// Highest addressable conference id.
pub const MAX_CID: u16 = 255;

/// Multicast group of conference `cid`.
///
/// Returns `None` for CIDs that do not fit the last octet.
#[must_use]
pub fn cid_group(cid: u16) -> Option<Ipv4Addr> {
    let last = u8::try_from(cid).ok()?;
    let [a, b, c] = OD4_MULTICAST_PREFIX;
    Some(Ipv4Addr::new(a, b, c, last))
}

// =======================================================================
// Buffer sizes
// =======================================================================

/// Largest IPv4 UDP payload (65535 - 8 byte UDP header - 20 byte IP header).
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Receive buffer handed to `recv_from`.
pub const RECV_BUFFER_SIZE: usize = 65_536;

/// Chunk size for TCP reads.
pub const TCP_READ_CHUNK: usize = 65_536;

// =======================================================================
// Timing
// =======================================================================

/// Upper bound on how long a receive loop sleeps before checking its stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A partially received fragmented envelope is dropped after this long without
/// a new datagram from the same sender.
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of senders with partial envelopes tracked at once.
pub const MAX_PENDING_SOURCES: usize = 64;

/// Blocking read timeout on TCP streams (stop-flag granularity).
pub const TCP_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default socket send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default multicast hop limit (same subnet).
pub const DEFAULT_MULTICAST_TTL: u8 = 1;

// =======================================================================
// Transport configuration
// =======================================================================

/// Socket tuning shared by UDP senders and receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Hop limit for multicast datagrams
    pub multicast_ttl: u8,
    /// Deliver multicast datagrams back to sockets on this host
    pub multicast_loop: bool,
    /// Interface for group membership and outgoing multicast (`None` = OS choice)
    pub interface: Option<Ipv4Addr>,
    /// Bound on a blocking send
    pub send_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            multicast_loop: true,
            interface: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Defaults overridden by `OD4_*` environment variables.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("OD4_MULTICAST_IF") {
            match val.parse::<Ipv4Addr>() {
                Ok(addr) => {
                    log::debug!("[CONFIG] Using OD4_MULTICAST_IF override: {}", addr);
                    config.interface = Some(addr);
                }
                Err(_) => log::debug!("[CONFIG] Ignoring invalid OD4_MULTICAST_IF='{}'", val),
            }
        }

        if let Some(ttl) = lookup("OD4_MULTICAST_TTL").and_then(|v| v.parse::<u8>().ok()) {
            if ttl > 0 {
                config.multicast_ttl = ttl;
            }
        }

        if let Some(val) = lookup("OD4_MULTICAST_LOOP") {
            config.multicast_loop = val != "0";
        }

        if let Some(ms) = lookup("OD4_SEND_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            if ms > 0 {
                config.send_timeout = Duration::from_millis(ms);
            }
        }

        config
    }

    #[must_use]
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = Some(interface);
        self
    }

    #[must_use]
    pub fn with_multicast_ttl(mut self, ttl: u8) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}
