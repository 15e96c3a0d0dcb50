// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime counters for receivers, connections and sessions.
//!
//! All counters are relaxed atomics updated on the I/O threads; `snapshot()`
//! copies them into a plain struct for reporting.
//!
//! ```
//! use od4::metrics::ReceiverMetrics;
//!
//! let metrics = ReceiverMetrics::new();
//! metrics.record_datagram(512);
//! assert_eq!(metrics.snapshot().datagrams_received, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// UDP receiver
// ============================================================================

/// Counters of one [`crate::UdpReceiver`].
#[derive(Debug, Default)]
pub struct ReceiverMetrics {
    /// Datagrams handed to the handler
    datagrams_received: AtomicU64,
    /// Payload bytes handed to the handler
    bytes_received: AtomicU64,
    /// Datagrams dropped because this process sent them
    own_datagrams_ignored: AtomicU64,
    /// Handler invocations that panicked
    handler_panics: AtomicU64,
    /// `recv_from` failures other than `WouldBlock`
    recv_errors: AtomicU64,
}

/// Point-in-time copy of [`ReceiverMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverMetricsSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub own_datagrams_ignored: u64,
    pub handler_panics: u64,
    pub recv_errors: u64,
}

impl ReceiverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_datagram(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_own_datagram(&self) {
        self.own_datagrams_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReceiverMetricsSnapshot {
        ReceiverMetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            own_datagrams_ignored: self.own_datagrams_ignored.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// TCP connection
// ============================================================================

/// Counters of one [`crate::TcpConnection`].
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    /// Chunks delivered to `on_data`
    chunks_received: AtomicU64,
    send_errors: AtomicU64,
    handler_panics: AtomicU64,
}

/// Point-in-time copy of [`ConnectionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionMetricsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub chunks_received: u64,
    pub send_errors: u64,
    pub handler_panics: u64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// OD4 session
// ============================================================================

/// Counters of one [`crate::OD4Session`].
#[derive(Debug, Default)]
pub struct SessionMetrics {
    envelopes_sent: AtomicU64,
    /// Envelopes dispatched to at least one handler
    envelopes_delivered: AtomicU64,
    /// Envelopes with no registered handler for their type
    envelopes_orphaned: AtomicU64,
    /// Malformed frames or bytes dropped by the decoder
    protocol_errors: AtomicU64,
    /// Data or time trigger invocations that panicked
    handler_panics: AtomicU64,
    /// Envelopes sent as more than one datagram
    fragmented_sends: AtomicU64,
    /// Partial envelopes dropped before completion (timeout, lost fragment, eviction)
    fragments_expired: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetricsSnapshot {
    pub envelopes_sent: u64,
    pub envelopes_delivered: u64,
    pub envelopes_orphaned: u64,
    pub protocol_errors: u64,
    pub handler_panics: u64,
    pub fragmented_sends: u64,
    pub fragments_expired: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, fragments: usize) {
        self.envelopes_sent.fetch_add(1, Ordering::Relaxed);
        if fragments > 1 {
            self.fragmented_sends.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delivered(&self) {
        self.envelopes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphaned(&self) {
        self.envelopes_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_expired(&self) {
        self.fragments_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            envelopes_sent: self.envelopes_sent.load(Ordering::Relaxed),
            envelopes_delivered: self.envelopes_delivered.load(Ordering::Relaxed),
            envelopes_orphaned: self.envelopes_orphaned.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            fragmented_sends: self.fragmented_sends.load(Ordering::Relaxed),
            fragments_expired: self.fragments_expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_snapshot() {
        let m = ReceiverMetrics::new();
        m.record_datagram(100);
        m.record_datagram(50);
        m.record_own_datagram();
        m.record_handler_panic();
        let s = m.snapshot();
        assert_eq!(s.datagrams_received, 2);
        assert_eq!(s.bytes_received, 150);
        assert_eq!(s.own_datagrams_ignored, 1);
        assert_eq!(s.handler_panics, 1);
        assert_eq!(s.recv_errors, 0);
    }

    #[test]
    fn test_session_fragmented_sends() {
        let m = SessionMetrics::new();
        m.record_sent(1);
        m.record_sent(3);
        let s = m.snapshot();
        assert_eq!(s.envelopes_sent, 2);
        assert_eq!(s.fragmented_sends, 1);
    }

    #[test]
    fn test_connection_counters() {
        let m = ConnectionMetrics::new();
        m.record_sent(10);
        m.record_chunk(4);
        m.record_send_error();
        assert_eq!(
            m.snapshot(),
            ConnectionMetricsSnapshot {
                bytes_sent: 10,
                bytes_received: 4,
                chunks_received: 1,
                send_errors: 1,
                handler_panics: 0,
            }
        );
    }
}
