// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Envelope body encoding.

use super::cursor::{zigzag_decode, FieldReader, FieldValue, FieldWriter};
use super::ProtocolError;
use crate::envelope::Envelope;
use crate::time::TimeStamp;

const FIELD_DATA_TYPE: u32 = 1;
const FIELD_SERIALIZED_DATA: u32 = 2;
const FIELD_SENT: u32 = 3;
const FIELD_RECEIVED: u32 = 4;
const FIELD_SAMPLED: u32 = 5;
const FIELD_SENDER_STAMP: u32 = 6;

const FIELD_SECONDS: u32 = 1;
const FIELD_MICROSECONDS: u32 = 2;

/// Worst-case encoded timestamp: two keys plus two 10-byte varints.
const TIMESTAMP_MAX_LEN: usize = 22;

fn encode_timestamp(ts: &TimeStamp) -> Vec<u8> {
    let mut w = FieldWriter::with_capacity(TIMESTAMP_MAX_LEN);
    w.write_sint(FIELD_SECONDS, ts.seconds());
    w.write_sint(FIELD_MICROSECONDS, i64::from(ts.microseconds()));
    w.into_inner()
}

fn decode_timestamp(buf: &[u8]) -> Result<TimeStamp, ProtocolError> {
    let mut seconds = 0i64;
    let mut microseconds = 0i64;
    let mut r = FieldReader::new(buf);
    while let Some((field, value)) = r.next_field()? {
        match (field, value) {
            (FIELD_SECONDS, FieldValue::Varint(v)) => seconds = zigzag_decode(v),
            (FIELD_MICROSECONDS, FieldValue::Varint(v)) => {
                microseconds = i64::from(
                    i32::try_from(zigzag_decode(v))
                        .map_err(|_| ProtocolError::ValueOutOfRange { field })?,
                );
            }
            (FIELD_SECONDS | FIELD_MICROSECONDS, _) => {
                return Err(ProtocolError::WrongWireType { field })
            }
            _ => {}
        }
    }
    Ok(TimeStamp::new(seconds, microseconds))
}

/// Encode the envelope body (without frame header).
#[must_use]
pub fn encode_body(envelope: &Envelope) -> Vec<u8> {
    let mut w = FieldWriter::with_capacity(envelope.serialized_data.len() + 96);
    // data_type is a signed 32-bit field on the wire
    w.write_sint(FIELD_DATA_TYPE, i64::from(envelope.data_type as i32));
    w.write_bytes(FIELD_SERIALIZED_DATA, &envelope.serialized_data);
    w.write_bytes(FIELD_SENT, &encode_timestamp(&envelope.sent));
    w.write_bytes(FIELD_RECEIVED, &encode_timestamp(&envelope.received));
    w.write_bytes(FIELD_SAMPLED, &encode_timestamp(&envelope.sampled));
    w.write_uint(FIELD_SENDER_STAMP, u64::from(envelope.sender_stamp));
    w.into_inner()
}

/// Decode an envelope body. Missing fields keep their defaults; unknown
/// fields are skipped.
pub fn decode_body(buf: &[u8]) -> Result<Envelope, ProtocolError> {
    let mut envelope = Envelope::default();
    let mut r = FieldReader::new(buf);
    while let Some((field, value)) = r.next_field()? {
        match (field, value) {
            (FIELD_DATA_TYPE, FieldValue::Varint(v)) => {
                let signed = i32::try_from(zigzag_decode(v))
                    .map_err(|_| ProtocolError::ValueOutOfRange { field })?;
                envelope.data_type = signed as u32;
            }
            (FIELD_SERIALIZED_DATA, FieldValue::Bytes(b)) => {
                envelope.serialized_data = b.to_vec();
            }
            (FIELD_SENT, FieldValue::Bytes(b)) => envelope.sent = decode_timestamp(b)?,
            (FIELD_RECEIVED, FieldValue::Bytes(b)) => envelope.received = decode_timestamp(b)?,
            (FIELD_SAMPLED, FieldValue::Bytes(b)) => envelope.sampled = decode_timestamp(b)?,
            (FIELD_SENDER_STAMP, FieldValue::Varint(v)) => {
                envelope.sender_stamp =
                    u32::try_from(v).map_err(|_| ProtocolError::ValueOutOfRange { field })?;
            }
            (FIELD_DATA_TYPE..=FIELD_SENDER_STAMP, _) => {
                return Err(ProtocolError::WrongWireType { field })
            }
            _ => {
                log::trace!("[CODEC] skipping unknown envelope field {}", field);
            }
        }
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            data_type: 1,
            serialized_data: b"hello".to_vec(),
            sent: TimeStamp::new(1_700_000_000, 123_456),
            received: TimeStamp::new(1_700_000_000, 223_456),
            sampled: TimeStamp::new(1_699_999_999, 999_999),
            sender_stamp: 5,
        }
    }

    #[test]
    fn test_body_round_trip() {
        let e = sample();
        assert_eq!(decode_body(&encode_body(&e)).unwrap(), e);
    }

    #[test]
    fn test_extreme_values_round_trip() {
        let e = Envelope {
            data_type: u32::MAX,
            serialized_data: vec![0u8; 0],
            sent: TimeStamp::new(i64::MAX, 999_999),
            received: TimeStamp::new(i64::MIN, 0),
            sampled: TimeStamp::new(-1, 1),
            sender_stamp: u32::MAX,
        };
        assert_eq!(decode_body(&encode_body(&e)).unwrap(), e);
    }

    #[test]
    fn test_random_envelopes_round_trip() {
        for _ in 0..200 {
            let len = fastrand::usize(0..2048);
            let e = Envelope {
                data_type: fastrand::u32(..),
                serialized_data: std::iter::repeat_with(|| fastrand::u8(..))
                    .take(len)
                    .collect(),
                sent: TimeStamp::from_micros(fastrand::i64(..) / 2),
                received: TimeStamp::from_micros(fastrand::i64(..) / 2),
                sampled: TimeStamp::from_micros(fastrand::i64(..) / 2),
                sender_stamp: fastrand::u32(..),
            };
            assert_eq!(decode_body(&encode_body(&e)).unwrap(), e);
        }
    }

    #[test]
    fn test_data_type_is_first_field() {
        let body = encode_body(&sample());
        // key (1 << 3 | 0), zig-zag(1) == 2
        assert_eq!(&body[..2], &[0x08, 0x02]);
    }

    #[test]
    fn test_missing_fields_default() {
        let mut w = FieldWriter::new();
        w.write_uint(FIELD_SENDER_STAMP, 42);
        let e = decode_body(&w.into_inner()).unwrap();
        assert_eq!(e.sender_stamp, 42);
        assert_eq!(e.data_type, 0);
        assert!(e.sent.is_unset());
    }

    #[test]
    fn test_unknown_field_skipped() {
        let mut w = FieldWriter::new();
        w.write_bytes(15, b"future");
        w.write_sint(FIELD_DATA_TYPE, 9);
        let e = decode_body(&w.into_inner()).unwrap();
        assert_eq!(e.data_type, 9);
    }

    #[test]
    fn test_wrong_wire_type_rejected() {
        let mut w = FieldWriter::new();
        w.write_bytes(FIELD_DATA_TYPE, b"x");
        assert_eq!(
            decode_body(&w.into_inner()),
            Err(ProtocolError::WrongWireType {
                field: FIELD_DATA_TYPE
            })
        );
    }

    #[test]
    fn test_sender_stamp_out_of_range() {
        let mut w = FieldWriter::new();
        w.write_uint(FIELD_SENDER_STAMP, u64::from(u32::MAX) + 1);
        assert_eq!(
            decode_body(&w.into_inner()),
            Err(ProtocolError::ValueOutOfRange {
                field: FIELD_SENDER_STAMP
            })
        );
    }
}
