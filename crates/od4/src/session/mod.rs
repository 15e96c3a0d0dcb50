// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OD4 session: typed envelope pub/sub on one conference.
//!
//! A conference id (CID) in `0..=255` selects the multicast group
//! `225.0.0.<cid>` on port `12175`. Every session on the same CID sees the
//! envelopes the others send; a session never sees its own.
//!
//! # Architecture
//!
//! ```text
//!  send(env) --stamp--> serialize --fragments--> UdpSender --> 225.0.0.cid:12175
//!
//!  UdpReceiver thread
//!      datagram --> Reassembler (per source) --> Envelope (received = now)
//!                                                  |
//!                           delegate? ------------+------------ TriggerTable
//!                           (every envelope)              (handlers for data_type)
//!
//!  TimeTrigger thread --> handler(elapsed) every period
//! ```
//!
//! # Example
//!
//! ```no_run
//! use od4::{Envelope, OD4Session};
//! use std::time::Duration;
//!
//! let session = OD4Session::new(111)?;
//! session.add_data_trigger(1001, |env: &Envelope| {
//!     println!("{} bytes from stamp {}", env.serialized_data.len(), env.sender_stamp);
//! });
//! session.set_time_trigger(Duration::from_millis(100), |_elapsed| {
//!     true
//! })?;
//! session.send(Envelope::new(1001, b"ping".to_vec()).with_sender_stamp(7))?;
//! # Ok::<(), od4::Error>(())
//! ```

mod reassembly;
mod timer;
mod triggers;

pub use triggers::DataHandler;

use crate::codec::serialize;
use crate::config::{
    cid_group, TransportConfig, FRAGMENT_TIMEOUT, MAX_DATAGRAM_SIZE, MAX_PENDING_SOURCES, OD4_PORT,
};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::metrics::SessionMetrics;
use crate::time::TimeStamp;
use crate::transport::{UdpReceiver, UdpSender};
use parking_lot::Mutex;
use reassembly::Reassembler;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use timer::TimeTrigger;
use triggers::{invoke, Dispatch, TriggerTable};

/// State reached from the receiver thread.
struct SessionInner {
    running: Arc<AtomicBool>,
    triggers: TriggerTable,
    delegate: Option<Arc<dyn DataHandler>>,
    reassembler: Mutex<Reassembler>,
    metrics: Arc<SessionMetrics>,
}

impl SessionInner {
    fn new(delegate: Option<Arc<dyn DataHandler>>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            triggers: TriggerTable::new(),
            delegate,
            reassembler: Mutex::new(Reassembler::new(
                MAX_PENDING_SOURCES,
                FRAGMENT_TIMEOUT,
                MAX_DATAGRAM_SIZE,
            )),
            metrics: Arc::new(SessionMetrics::new()),
        }
    }

    fn on_datagram(&self, payload: &[u8], from: SocketAddr, received: TimeStamp) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        // handlers run after the reassembler lock is released
        let batch = self.reassembler.lock().push(from, payload, Instant::now());

        for _ in 0..batch.expired {
            self.metrics.record_fragment_expired();
        }
        for error in &batch.errors {
            self.metrics.record_protocol_error();
            log::debug!("[OD4] dropping malformed data from {}: {}", from, error);
        }
        for mut envelope in batch.envelopes {
            envelope.received = received;
            self.deliver(&envelope);
        }
    }

    fn deliver(&self, envelope: &Envelope) {
        let outcome = match &self.delegate {
            Some(delegate) => {
                let mut outcome = Dispatch::default();
                invoke(delegate.as_ref(), envelope, &mut outcome);
                outcome
            }
            None => self.triggers.dispatch(envelope),
        };

        for _ in 0..outcome.panicked {
            self.metrics.record_handler_panic();
        }
        if outcome.is_orphan() {
            self.metrics.record_orphaned();
            log::trace!(
                "[OD4] no handler for data type {} (sender stamp {})",
                envelope.data_type,
                envelope.sender_stamp
            );
        } else if outcome.delivered > 0 {
            self.metrics.record_delivered();
        }
    }
}

/// Membership in one OD4 conference.
///
/// Sending is thread-safe. Data handlers run on the receiver thread, the
/// periodic time handler on its own thread. Dropping the session stops both
/// and waits for them, unless the drop happens inside one of the handlers.
pub struct OD4Session {
    cid: u16,
    inner: Arc<SessionInner>,
    sender: UdpSender,
    send_lock: Mutex<()>,
    receiver: Mutex<Option<UdpReceiver>>,
    time_trigger: Mutex<Option<TimeTrigger>>,
}

impl OD4Session {
    /// Join conference `cid` with [`TransportConfig::from_env`].
    pub fn new(cid: u16) -> Result<Self> {
        Self::open(cid, &TransportConfig::from_env(), None)
    }

    pub fn with_config(cid: u16, config: TransportConfig) -> Result<Self> {
        Self::open(cid, &config, None)
    }

    /// Join conference `cid` with one handler receiving every envelope.
    ///
    /// [`OD4Session::add_data_trigger`] is refused on such a session.
    pub fn with_delegate<H: DataHandler>(cid: u16, delegate: H) -> Result<Self> {
        Self::open(cid, &TransportConfig::from_env(), Some(Arc::new(delegate)))
    }

    fn open(
        cid: u16,
        config: &TransportConfig,
        delegate: Option<Arc<dyn DataHandler>>,
    ) -> Result<Self> {
        let group = cid_group(cid).ok_or(Error::InvalidCid(cid))?.to_string();
        Self::open_at(cid, &group, OD4_PORT, config, delegate)
    }

    /// Session for `cid` exchanging envelopes on `group:port`.
    fn open_at(
        cid: u16,
        group: &str,
        port: u16,
        config: &TransportConfig,
        delegate: Option<Arc<dyn DataHandler>>,
    ) -> Result<Self> {
        let sender = UdpSender::with_config(group, port, config)?;
        let inner = Arc::new(SessionInner::new(delegate));

        let sink = Arc::clone(&inner);
        let receiver = UdpReceiver::with_config(
            group,
            port,
            move |payload: &[u8], from: SocketAddr, received: TimeStamp| {
                sink.on_datagram(payload, from, received);
            },
            sender.send_from_port(),
            config,
        )?;

        log::debug!(
            "[OD4] session cid={} on {}:{} (sending from port {})",
            cid,
            group,
            port,
            sender.send_from_port()
        );
        Ok(Self {
            cid,
            inner,
            sender,
            send_lock: Mutex::new(()),
            receiver: Mutex::new(Some(receiver)),
            time_trigger: Mutex::new(None),
        })
    }

    pub fn cid(&self) -> u16 {
        self.cid
    }

    /// `true` until the session is dropped or its receiver fails.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
            && self
                .receiver
                .lock()
                .as_ref()
                .is_some_and(UdpReceiver::is_running)
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.inner.metrics
    }

    /// Publish `envelope` to the conference.
    ///
    /// `sent` is stamped with the current time when unset, and `sampled`
    /// defaults to `sent`. An envelope larger than one datagram goes out as
    /// consecutive datagrams that receivers reassemble.
    pub fn send(&self, mut envelope: Envelope) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(Error::NotRunning);
        }
        envelope.stamp_for_send(TimeStamp::now());
        let bytes = serialize(&envelope)?;

        let _guard = self.send_lock.lock();
        let mut fragments = 0;
        for chunk in bytes.chunks(MAX_DATAGRAM_SIZE) {
            self.sender.send(chunk)?;
            fragments += 1;
        }
        self.inner.metrics.record_sent(fragments);
        Ok(())
    }

    /// Wrap `payload` in an envelope of `data_type` and send it.
    pub fn send_payload(&self, data_type: u32, payload: &[u8], sender_stamp: u32) -> Result<()> {
        self.send(Envelope::new(data_type, payload.to_vec()).with_sender_stamp(sender_stamp))
    }

    /// Run `handler` for every later envelope of `data_type`.
    ///
    /// Returns `false` (and drops the handler) when the session was built
    /// with a delegate.
    pub fn add_data_trigger<H: DataHandler>(&self, data_type: u32, handler: H) -> bool {
        if self.inner.delegate.is_some() {
            log::warn!(
                "[OD4] cid={} has a delegate, ignoring trigger for data type {}",
                self.cid,
                data_type
            );
            return false;
        }
        self.inner.triggers.add(data_type, Arc::new(handler));
        true
    }

    /// Remove every handler for `data_type`; returns how many there were.
    pub fn remove_data_triggers(&self, data_type: u32) -> usize {
        self.inner.triggers.remove(data_type)
    }

    /// Data types with at least one handler, ascending.
    pub fn data_trigger_types(&self) -> Vec<u32> {
        self.inner.triggers.data_types()
    }

    /// Call `handler(elapsed)` every `period` on a dedicated thread, where
    /// `elapsed` is the time since the previous call.
    ///
    /// Replaces the current time trigger. The trigger ends when the handler
    /// returns `false` or the session stops.
    pub fn set_time_trigger<F>(&self, period: Duration, handler: F) -> Result<()>
    where
        F: FnMut(Duration) -> bool + Send + 'static,
    {
        let trigger = TimeTrigger::spawn(
            period,
            handler,
            Arc::clone(&self.inner.running),
            Arc::clone(&self.inner.metrics),
        )?;
        let previous = self.time_trigger.lock().replace(trigger);
        drop(previous);
        Ok(())
    }

    /// Stop the time trigger, if any.
    pub fn clear_time_trigger(&self) {
        let previous = self.time_trigger.lock().take();
        drop(previous);
    }

    /// Run `handler` at `freq_hz` on the calling thread until it returns
    /// `false` or the session stops.
    pub fn time_trigger<F>(&self, freq_hz: f32, handler: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        timer::run_blocking(freq_hz, handler, &self.inner.running)
    }
}

impl Drop for OD4Session {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        let trigger = self.time_trigger.get_mut().take();
        drop(trigger);
        let receiver = self.receiver.get_mut().take();
        drop(receiver);
        log::debug!("[OD4] session cid={} closed", self.cid);
    }
}

impl std::fmt::Debug for OD4Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OD4Session")
            .field("cid", &self.cid)
            .field("running", &self.is_running())
            .field("destination", &self.sender.destination())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], 40000))
    }

    fn wire(envelope: &Envelope) -> Vec<u8> {
        let mut e = envelope.clone();
        e.stamp_for_send(TimeStamp::now());
        serialize(&e).unwrap()
    }

    fn collector(inner: &SessionInner, data_type: u32) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        inner
            .triggers
            .add(data_type, Arc::new(move |e: &Envelope| sink.lock().push(e.clone())));
        seen
    }

    #[test]
    fn test_delivery_in_order_with_received_stamp() {
        let inner = SessionInner::new(None);
        let seen = collector(&inner, 1);

        for stamp in 0..5 {
            let env = Envelope::new(1, b"hello".to_vec()).with_sender_stamp(stamp);
            inner.on_datagram(&wire(&env), peer(), TimeStamp::now());
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 5);
        for (i, env) in seen.iter().enumerate() {
            assert_eq!(env.sender_stamp, i as u32);
            assert_eq!(env.serialized_data, b"hello");
            assert!(!env.received.is_unset());
            assert!(env.received >= env.sent);
        }
        assert_eq!(inner.metrics.snapshot().envelopes_delivered, 5);
    }

    #[test]
    fn test_types_are_isolated() {
        let inner = SessionInner::new(None);
        let ones = collector(&inner, 1);
        let twos = collector(&inner, 2);

        inner.on_datagram(&wire(&Envelope::new(2, vec![])), peer(), TimeStamp::now());
        inner.on_datagram(&wire(&Envelope::new(3, vec![])), peer(), TimeStamp::now());

        assert!(ones.lock().is_empty());
        assert_eq!(twos.lock().len(), 1);
        let snap = inner.metrics.snapshot();
        assert_eq!(snap.envelopes_delivered, 1);
        assert_eq!(snap.envelopes_orphaned, 1);
    }

    #[test]
    fn test_malformed_datagram_counted_and_skipped() {
        let inner = SessionInner::new(None);
        let seen = collector(&inner, 1);

        inner.on_datagram(b"not an envelope", peer(), TimeStamp::now());
        inner.on_datagram(&wire(&Envelope::new(1, vec![1])), peer(), TimeStamp::now());

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(inner.metrics.snapshot().protocol_errors, 1);
    }

    #[test]
    fn test_fragmented_envelope_reassembled() {
        let inner = SessionInner::new(None);
        let seen = collector(&inner, 9);

        let payload: Vec<u8> = (0..MAX_DATAGRAM_SIZE + 100).map(|_| fastrand::u8(..)).collect();
        let bytes = wire(&Envelope::new(9, payload.clone()));
        let chunks: Vec<&[u8]> = bytes.chunks(MAX_DATAGRAM_SIZE).collect();
        assert_eq!(chunks.len(), 2);
        for chunk in chunks {
            inner.on_datagram(chunk, peer(), TimeStamp::now());
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].serialized_data, payload);
    }

    #[test]
    fn test_lost_fragment_keeps_later_envelopes() {
        let inner = SessionInner::new(None);
        let seen = collector(&inner, 1);

        let payload = vec![0x55; 2 * MAX_DATAGRAM_SIZE];
        let big = wire(&Envelope::new(9, payload));
        inner.on_datagram(&big[..MAX_DATAGRAM_SIZE], peer(), TimeStamp::now());
        for stamp in 0..100 {
            let env = Envelope::new(1, vec![7; 64]).with_sender_stamp(stamp);
            inner.on_datagram(&wire(&env), peer(), TimeStamp::now());
        }

        assert_eq!(seen.lock().len(), 100);
        let snap = inner.metrics.snapshot();
        assert_eq!(snap.fragments_expired, 1);
        assert_eq!(snap.protocol_errors, 0);
    }

    #[test]
    fn test_delegate_sees_everything() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let inner = SessionInner::new(Some(Arc::new(move |_: &Envelope| {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        for t in [1, 2, 3] {
            inner.on_datagram(&wire(&Envelope::new(t, vec![])), peer(), TimeStamp::now());
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_handler_counted() {
        let inner = SessionInner::new(None);
        inner.triggers.add(1, Arc::new(|_: &Envelope| panic!("boom")));
        let after = collector(&inner, 1);

        inner.on_datagram(&wire(&Envelope::new(1, vec![])), peer(), TimeStamp::now());
        assert_eq!(after.lock().len(), 1);
        assert_eq!(inner.metrics.snapshot().handler_panics, 1);
    }

    #[test]
    fn test_nothing_delivered_after_stop() {
        let inner = SessionInner::new(None);
        let seen = collector(&inner, 1);
        inner.running.store(false, Ordering::Release);
        inner.on_datagram(&wire(&Envelope::new(1, vec![])), peer(), TimeStamp::now());
        assert!(seen.lock().is_empty());
    }

    fn loopback_session(cid: u16) -> (OD4Session, u16) {
        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .and_then(|s| s.local_addr())
            .map(|a| a.port())
            .unwrap();
        let session = OD4Session::open_at(cid, "127.0.0.1", port, &TransportConfig::default(), None).unwrap();
        (session, port)
    }

    #[test]
    fn test_loopback_session_receives_peer_envelope() {
        let (session, port) = loopback_session(80);
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        assert!(session.add_data_trigger(1, move |e: &Envelope| {
            let _ = tx.lock().send(e.clone());
        }));
        assert!(session.is_running());

        let peer = UdpSender::new("127.0.0.1", port).unwrap();
        peer.send(&wire(&Envelope::new(1, b"hello".to_vec()).with_sender_stamp(5)))
            .unwrap();

        let env = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(env.data_type, 1);
        assert_eq!(env.serialized_data, b"hello");
        assert_eq!(env.sender_stamp, 5);
        assert!(env.received >= env.sent);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(session.metrics().snapshot().envelopes_delivered, 1);
    }

    #[test]
    fn test_loopback_session_ignores_own_envelopes() {
        let (session, _port) = loopback_session(80);
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        session.add_data_trigger(1, move |e: &Envelope| {
            let _ = tx.lock().send(e.clone());
        });

        session.send_payload(1, b"mine", 9).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        let snap = session.metrics().snapshot();
        assert_eq!(snap.envelopes_sent, 1);
        assert_eq!(snap.envelopes_delivered, 0);
    }

    #[test]
    fn test_invalid_cid_rejected() {
        let err = OD4Session::new(256).unwrap_err();
        assert!(matches!(err, Error::InvalidCid(256)));
        assert_eq!(err.kind(), crate::ErrorKind::Usage);
    }
}
