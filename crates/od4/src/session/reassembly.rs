// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-source frame reassembly.
//!
//! An envelope larger than one datagram arrives as consecutive datagrams
//! from the same source, every one but the last exactly `fragment_size`
//! bytes long. Each source gets its own [`FrameDecoder`]; a source that stays
//! silent for longer than the fragment timeout loses its partial frame, and
//! so does a source whose next datagram cannot be the expected fragment
//! (a fragment was lost). The common case (one datagram = one frame) never
//! touches the cache.

use crate::codec::{deserialize, FrameDecoder, ProtocolError, FRAME_HEADER_SIZE, FRAME_MAGIC};
use crate::envelope::Envelope;
use lru::LruCache;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

struct Pending {
    decoder: FrameDecoder,
    /// Header plus body length announced by the first fragment
    expected: usize,
    last_seen: Instant,
}

impl Pending {
    /// `true` when a datagram of `len` bytes is the next fragment of this frame.
    fn continues_with(&self, len: usize, fragment_size: usize) -> bool {
        let remaining = self.expected.saturating_sub(self.decoder.buffered());
        len == remaining.min(fragment_size)
    }
}

/// What one datagram produced.
#[derive(Debug, Default)]
pub(crate) struct Reassembled {
    pub envelopes: Vec<Envelope>,
    pub errors: Vec<ProtocolError>,
    /// Partial frames dropped (timeout, lost fragment or cache eviction)
    pub expired: usize,
}

pub(crate) struct Reassembler {
    pending: LruCache<SocketAddr, Pending>,
    timeout: Duration,
    fragment_size: usize,
}

/// Total frame length announced by the header at the start of `datagram`.
fn frame_len(datagram: &[u8]) -> Option<usize> {
    if datagram.len() < FRAME_HEADER_SIZE || datagram[..2] != FRAME_MAGIC {
        return None;
    }
    let body = usize::from(datagram[2]) | usize::from(datagram[3]) << 8 | usize::from(datagram[4]) << 16;
    Some(FRAME_HEADER_SIZE + body)
}

fn drain(decoder: &mut FrameDecoder, out: &mut Reassembled) {
    while let Some(result) = decoder.next_envelope() {
        match result {
            Ok(envelope) => out.envelopes.push(envelope),
            Err(e) => out.errors.push(e),
        }
    }
}

impl Reassembler {
    pub(crate) fn new(max_sources: usize, timeout: Duration, fragment_size: usize) -> Self {
        Self {
            pending: LruCache::new(NonZeroUsize::new(max_sources).unwrap_or(NonZeroUsize::MIN)),
            timeout,
            fragment_size: fragment_size.max(FRAME_HEADER_SIZE),
        }
    }

    /// Sources with a partial frame buffered.
    pub(crate) fn pending_sources(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn push(&mut self, from: SocketAddr, datagram: &[u8], now: Instant) -> Reassembled {
        let mut out = Reassembled {
            expired: self.expire(now),
            ..Reassembled::default()
        };

        let broken = self
            .pending
            .peek(&from)
            .is_some_and(|p| !p.continues_with(datagram.len(), self.fragment_size));
        if broken {
            if let Some(old) = self.pending.pop(&from) {
                log::debug!(
                    "[OD4] fragment missing from {}, dropping {} of {} bytes",
                    from,
                    old.decoder.buffered(),
                    old.expected
                );
            }
            out.expired += 1;
        }

        if let Some(pending) = self.pending.get_mut(&from) {
            pending.last_seen = now;
            pending.decoder.push(datagram);
            drain(&mut pending.decoder, &mut out);
            if pending.decoder.buffered() == 0 {
                self.pending.pop(&from);
            }
            return out;
        }

        match frame_len(datagram) {
            Some(total) if total == datagram.len() => match deserialize(datagram) {
                Ok(envelope) => out.envelopes.push(envelope),
                Err(e) => out.errors.push(e),
            },
            Some(total) if total > datagram.len() && datagram.len() == self.fragment_size => {
                let mut decoder = FrameDecoder::new();
                decoder.push(datagram);
                let fresh = Pending {
                    decoder,
                    expected: total,
                    last_seen: now,
                };
                if let Some((evicted, old)) = self.pending.push(from, fresh) {
                    log::debug!(
                        "[OD4] dropping {} buffered bytes from {} (too many sources)",
                        old.decoder.buffered(),
                        evicted
                    );
                    out.expired += 1;
                }
            }
            _ => {
                // not a frame start, a short frame, or several frames in one datagram
                let mut decoder = FrameDecoder::new();
                decoder.push(datagram);
                drain(&mut decoder, &mut out);
                if decoder.buffered() > 0 {
                    out.errors.push(ProtocolError::Truncated {
                        offset: datagram.len(),
                    });
                }
            }
        }
        out
    }

    /// Drop partial frames older than the timeout; returns how many.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let stale: Vec<SocketAddr> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_seen) > self.timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            if let Some(p) = self.pending.pop(addr) {
                log::debug!(
                    "[OD4] partial frame from {} timed out ({} of {} bytes)",
                    addr,
                    p.decoder.buffered(),
                    p.expected
                );
            }
        }
        if !stale.is_empty() {
            log::debug!("[OD4] {} source(s) still reassembling", self.pending_sources());
        }
        stale.len()
    }
}
