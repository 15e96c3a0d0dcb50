// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame header handling and streaming frame extraction.

use super::envelope::{decode_body, encode_body};
use super::ProtocolError;
use crate::envelope::Envelope;

/// First two bytes of every frame.
pub const FRAME_MAGIC: [u8; 2] = [0x0D, 0xA4];

/// Magic plus 24-bit little-endian body length.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Largest body expressible in the 24-bit length field.
pub const MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// Prefix an encoded body with the frame header.
pub fn frame_body(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_BODY_SIZE,
        });
    }
    let len = (body.len() as u32).to_le_bytes();
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len[..3]);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Serialize an envelope into one frame.
///
/// Fails only when the encoded body exceeds [`MAX_BODY_SIZE`].
pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    frame_body(&encode_body(envelope))
}

fn body_len(header: &[u8]) -> usize {
    usize::from(header[2]) | usize::from(header[3]) << 8 | usize::from(header[4]) << 16
}

/// Deserialize exactly one frame.
pub fn deserialize(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            offset: bytes.len(),
        });
    }
    if bytes[..2] != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic([bytes[0], bytes[1]]));
    }
    let total = FRAME_HEADER_SIZE + body_len(bytes);
    if bytes.len() < total {
        return Err(ProtocolError::Truncated {
            offset: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(ProtocolError::TrailingBytes {
            count: bytes.len() - total,
        });
    }
    decode_body(&bytes[FRAME_HEADER_SIZE..total])
}

/// Incremental frame extractor for byte streams and split datagrams.
///
/// Bytes are appended with [`FrameDecoder::push`]; [`FrameDecoder::next_envelope`]
/// yields envelopes as soon as complete frames are buffered. Garbage in front
/// of a frame header is discarded and reported once as [`ProtocolError::BadMagic`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    frames_decoded: u64,
    bytes_discarded: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Position of the first possible frame start (a lone trailing `0x0D` counts).
    fn find_magic(&self) -> Option<usize> {
        let len = self.buffer.len();
        (0..len).find(|&i| {
            self.buffer[i] == FRAME_MAGIC[0] && (i + 1 == len || self.buffer[i + 1] == FRAME_MAGIC[1])
        })
    }

    /// Next decoded envelope, `None` when more bytes are needed.
    pub fn next_envelope(&mut self) -> Option<Result<Envelope, ProtocolError>> {
        if self.buffer.is_empty() {
            return None;
        }

        let start = self.find_magic().unwrap_or(self.buffer.len());
        if start > 0 {
            let bad = [
                self.buffer[0],
                self.buffer.get(1).copied().unwrap_or_default(),
            ];
            self.buffer.drain(..start);
            self.bytes_discarded += start as u64;
            return Some(Err(ProtocolError::BadMagic(bad)));
        }

        if self.buffer.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let total = FRAME_HEADER_SIZE + body_len(&self.buffer);
        if self.buffer.len() < total {
            return None;
        }

        let result = decode_body(&self.buffer[FRAME_HEADER_SIZE..total]);
        self.buffer.drain(..total);
        if result.is_ok() {
            self.frames_decoded += 1;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeStamp;

    fn envelope(data_type: u32, payload: &[u8]) -> Envelope {
        Envelope {
            data_type,
            serialized_data: payload.to_vec(),
            sent: TimeStamp::new(10, 20),
            sender_stamp: 3,
            ..Envelope::default()
        }
    }

    #[test]
    fn test_header_layout() {
        let frame = serialize(&envelope(1, b"hello")).unwrap();
        assert_eq!(&frame[..2], &FRAME_MAGIC);
        assert_eq!(body_len(&frame), frame.len() - FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_round_trip() {
        let e = envelope(31, b"muppet");
        assert_eq!(deserialize(&serialize(&e).unwrap()).unwrap(), e);
    }

    #[test]
    fn test_deserialize_rejects_bad_input() {
        let frame = serialize(&envelope(1, b"x")).unwrap();

        assert!(matches!(
            deserialize(&frame[..3]),
            Err(ProtocolError::Truncated { .. })
        ));
        assert!(matches!(
            deserialize(&frame[..frame.len() - 1]),
            Err(ProtocolError::Truncated { .. })
        ));

        let mut trailing = frame.clone();
        trailing.push(0);
        assert_eq!(
            deserialize(&trailing),
            Err(ProtocolError::TrailingBytes { count: 1 })
        );

        let mut bad = frame;
        bad[0] = 0xFF;
        assert!(matches!(deserialize(&bad), Err(ProtocolError::BadMagic(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let body = vec![0u8; MAX_BODY_SIZE + 1];
        assert!(matches!(
            frame_body(&body),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_decoder_concatenated_frames() {
        let mut bytes = serialize(&envelope(1, b"a")).unwrap();
        bytes.extend(serialize(&envelope(2, b"b")).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_envelope().unwrap().unwrap().data_type, 1);
        assert_eq!(decoder.next_envelope().unwrap().unwrap().data_type, 2);
        assert!(decoder.next_envelope().is_none());
        assert_eq!(decoder.frames_decoded(), 2);
    }

    #[test]
    fn test_decoder_split_frame() {
        let e = envelope(7, &[0xAB; 300]);
        let bytes = serialize(&e).unwrap();
        let mut decoder = FrameDecoder::new();

        for chunk in bytes.chunks(64) {
            assert!(decoder.next_envelope().is_none());
            decoder.push(chunk);
        }
        assert_eq!(decoder.next_envelope().unwrap().unwrap(), e);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_resyncs_after_garbage() {
        let mut bytes = vec![0x01, 0x02, 0x03];
        bytes.extend(serialize(&envelope(4, b"ok")).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(
            decoder.next_envelope(),
            Some(Err(ProtocolError::BadMagic([0x01, 0x02])))
        );
        assert_eq!(decoder.next_envelope().unwrap().unwrap().data_type, 4);
        assert_eq!(decoder.bytes_discarded(), 3);
    }

    #[test]
    fn test_decoder_drops_pure_garbage() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x55; 10]);
        assert!(matches!(
            decoder.next_envelope(),
            Some(Err(ProtocolError::BadMagic(_)))
        ));
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.next_envelope().is_none());
    }

    #[test]
    fn test_decoder_keeps_lone_magic_byte() {
        let bytes = serialize(&envelope(5, b"z")).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..1]);
        assert!(decoder.next_envelope().is_none());
        decoder.push(&bytes[1..]);
        assert_eq!(decoder.next_envelope().unwrap().unwrap().data_type, 5);
    }
}
