// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.
//!
//! Every fallible public operation returns [`Result`]. Errors are grouped by
//! the layer that raised them; [`Error::kind`] collapses a value into one of
//! the coarse categories callers usually branch on.

use crate::codec::ProtocolError;
use crate::shm::ShmError;
use std::fmt;
use std::io;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bind, connect or send failure. Never retried internally.
    Network,
    /// Malformed envelope bytes.
    Protocol,
    /// Shared-memory accessor used without holding the lock.
    LockState,
    /// OS object (shared memory, mutex, thread) could not be created or opened.
    Resource,
    /// Invalid argument or call sequence.
    Usage,
}

/// Errors returned by OD4 operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Network
    // ========================================================================
    /// Address string could not be parsed or resolved.
    InvalidAddress(String),
    /// Failed to create or bind a socket.
    BindFailed { addr: String, source: io::Error },
    /// Failed to join a multicast group.
    MulticastJoinFailed { group: String, source: io::Error },
    /// Outbound TCP connection could not be established.
    ConnectFailed { addr: String, source: io::Error },
    /// The OS rejected a send.
    SendFailed(io::Error),
    /// Payload exceeds what a single datagram can carry.
    PayloadTooLarge { size: usize, max: usize },
    /// Operation on a connection or session that is no longer running.
    NotRunning,

    // ========================================================================
    // Protocol
    // ========================================================================
    /// Envelope bytes could not be decoded.
    Protocol(ProtocolError),

    // ========================================================================
    // Lock state
    // ========================================================================
    /// Shared-memory data or timestamp accessed without holding the lock.
    NotLocked,

    // ========================================================================
    // Resource
    // ========================================================================
    /// Shared-memory segment or synchronization primitive failure.
    Shm(ShmError),
    /// Background thread could not be spawned.
    ThreadSpawn(io::Error),
    /// Feature not available on this platform.
    Unsupported,

    // ========================================================================
    // Usage
    // ========================================================================
    /// Conference id outside the addressable range (0-255).
    InvalidCid(u16),
    /// Invalid argument.
    InvalidArgument(String),
}

impl Error {
    /// Coarse category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAddress(_)
            | Error::BindFailed { .. }
            | Error::MulticastJoinFailed { .. }
            | Error::ConnectFailed { .. }
            | Error::SendFailed(_)
            | Error::PayloadTooLarge { .. }
            | Error::NotRunning => ErrorKind::Network,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::NotLocked => ErrorKind::LockState,
            Error::Shm(_) | Error::ThreadSpawn(_) | Error::Unsupported => ErrorKind::Resource,
            Error::InvalidCid(_) | Error::InvalidArgument(_) => ErrorKind::Usage,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidAddress(addr) => write!(f, "Invalid address: {}", addr),
            Error::BindFailed { addr, source } => write!(f, "Bind failed on {}: {}", addr, source),
            Error::MulticastJoinFailed { group, source } => {
                write!(f, "Multicast join failed for {}: {}", group, source)
            }
            Error::ConnectFailed { addr, source } => {
                write!(f, "Connect to {} failed: {}", addr, source)
            }
            Error::SendFailed(e) => write!(f, "Send failed: {}", e),
            Error::PayloadTooLarge { size, max } => {
                write!(f, "Payload too large: {} bytes (max {})", size, max)
            }
            Error::NotRunning => write!(f, "Not running"),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::NotLocked => write!(f, "Segment not locked"),
            Error::Shm(e) => write!(f, "Shared memory error: {}", e),
            Error::ThreadSpawn(e) => write!(f, "Failed to spawn thread: {}", e),
            Error::Unsupported => write!(f, "Unsupported on this platform"),
            Error::InvalidCid(cid) => write!(f, "Invalid CID: {} (must be 0-255)", cid),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BindFailed { source, .. }
            | Error::MulticastJoinFailed { source, .. }
            | Error::ConnectFailed { source, .. } => Some(source),
            Error::SendFailed(e) | Error::ThreadSpawn(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Shm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ShmError> for Error {
    fn from(e: ShmError) -> Self {
        Error::Shm(e)
    }
}

/// Convenient alias for results using the crate [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
