// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The message envelope exchanged on an OD4 conference.

use crate::time::TimeStamp;

/// A typed, timestamped, opaque payload.
///
/// The producer fills `data_type`, `serialized_data`, `sender_stamp` and
/// optionally `sampled`. `sent` is stamped by [`crate::OD4Session::send`] when
/// left unset and `received` is always stamped by the receiving session.
///
/// ```
/// use od4::Envelope;
///
/// let envelope = Envelope::new(1, b"hello".to_vec()).with_sender_stamp(5);
/// let bytes = od4::codec::serialize(&envelope).unwrap();
/// assert_eq!(od4::codec::deserialize(&bytes).unwrap(), envelope);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub data_type: u32,
    pub serialized_data: Vec<u8>,
    pub sent: TimeStamp,
    pub received: TimeStamp,
    pub sampled: TimeStamp,
    pub sender_stamp: u32,
}

impl Envelope {
    #[must_use]
    pub fn new(data_type: u32, serialized_data: Vec<u8>) -> Self {
        Self {
            data_type,
            serialized_data,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sender_stamp(mut self, sender_stamp: u32) -> Self {
        self.sender_stamp = sender_stamp;
        self
    }

    #[must_use]
    pub fn with_sampled(mut self, sampled: TimeStamp) -> Self {
        self.sampled = sampled;
        self
    }

    /// Fill `sent` with `now` if unset, then default `sampled` to `sent`.
    pub(crate) fn stamp_for_send(&mut self, now: TimeStamp) {
        if self.sent.is_unset() {
            self.sent = now;
        }
        if self.sampled.is_unset() {
            self.sampled = self.sent;
        }
    }
}
