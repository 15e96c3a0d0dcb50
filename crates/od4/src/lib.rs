// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # OD4 - envelope middleware for distributed sensing and control
//!
//! Small, thread-based building blocks for exchanging typed binary messages
//! between processes on one host or across a LAN.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use od4::{Envelope, OD4Session, Result};
//!
//! fn main() -> Result<()> {
//!     // Join conference 111 (multicast 225.0.0.111:12175)
//!     let session = OD4Session::new(111)?;
//!
//!     // React to every envelope of data type 19
//!     session.add_data_trigger(19, |env: &Envelope| {
//!         println!("type 19 from {}: {} bytes", env.sender_stamp, env.serialized_data.len());
//!     });
//!
//!     // Publish one
//!     session.send(Envelope::new(19, b"speed=12.5".to_vec()))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   OD4Session: CID -> 225.0.0.<cid>:12175, data/time triggers         |
//! +---------------------------------------------------------------------+
//! |   codec: Envelope <-> 0x0D 0xA4 | len | tagged fields, FrameDecoder   |
//! +----------------------------------+----------------------------------+
//! |   UdpSender / UdpReceiver        |   TcpConnection / TcpServer      |
//! +----------------------------------+----------------------------------+
//! |   SharedMemory: named area + process-shared mutex/condvar + stamp     |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Envelope`] | Typed message container carried on the wire |
//! | [`TimeStamp`] | Seconds + microseconds since the Unix epoch |
//! | [`OD4Session`] | Pub/sub on one conference id |
//! | [`UdpSender`] / [`UdpReceiver`] | Datagram endpoints (unicast, broadcast, multicast) |
//! | [`TcpConnection`] / [`TcpServer`] | Byte-stream endpoints |
//! | [`SharedMemory`] | Inter-process memory with lock, wait/notify and timestamp |
//!
//! Every background loop runs on its own named thread and invokes the
//! application's handlers there. Dropping the owning value stops and joins
//! the thread.

/// Envelope wire format (serialize, deserialize, streaming frame decoder).
pub mod codec;
/// Protocol constants and transport configuration.
pub mod config;
mod envelope;
mod error;
/// Runtime counters for receivers, connections and sessions.
pub mod metrics;
/// Conference-based pub/sub.
pub mod session;
/// Named shared memory with process-shared synchronization.
pub mod shm;
mod time;
/// UDP and TCP endpoints.
pub mod transport;

pub use codec::ProtocolError;
pub use config::TransportConfig;
pub use envelope::Envelope;
pub use error::{Error, ErrorKind, Result};
pub use session::{DataHandler, OD4Session};
pub use shm::{SharedMemory, SharedMemoryGuard, ShmError};
pub use time::TimeStamp;
pub use transport::{
    ConnectionLostHandler, DatagramHandler, NewConnectionHandler, TcpConnection, TcpDataHandler,
    TcpServer, UdpReceiver, UdpSender,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
