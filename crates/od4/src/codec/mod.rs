// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OD4 wire format.
//!
//! An envelope travels as one frame:
//!
//! ```text
//! +------+------+-----------------+---------------------------+
//! | 0x0D | 0xA4 | body len (u24LE)| tagged-field body         |
//! +------+------+-----------------+---------------------------+
//! ```
//!
//! The body is a sequence of `(key, value)` fields where
//! `key = field_number << 3 | wire_type`; scalars are varints (signed ones
//! zig-zag encoded) and nested timestamps are length-delimited. Frames are
//! self-describing, so a receiver can recover `data_type` without knowing the
//! payload schema.
//!
//! | field | envelope        | timestamp    |
//! |-------|-----------------|--------------|
//! | 1     | data_type       | seconds      |
//! | 2     | serialized_data | microseconds |
//! | 3     | sent            |              |
//! | 4     | received        |              |
//! | 5     | sampled         |              |
//! | 6     | sender_stamp    |              |

pub mod cursor;
mod envelope;
mod frame;

pub use envelope::{decode_body, encode_body};
pub use frame::{
    deserialize, frame_body, serialize, FrameDecoder, FRAME_HEADER_SIZE, FRAME_MAGIC,
    MAX_BODY_SIZE,
};

use std::fmt;

/// Malformed envelope bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame does not start with `0x0D 0xA4`.
    BadMagic([u8; 2]),
    /// Input ended before the announced length.
    Truncated { offset: usize },
    /// Varint longer than 10 bytes.
    VarintOverflow { offset: usize },
    /// Field key with field number 0 or out of range.
    InvalidKey { offset: usize },
    /// Wire type the decoder cannot skip.
    UnsupportedWireType { field: u32, wire_type: u8 },
    /// Known field carried with the wrong wire type.
    WrongWireType { field: u32 },
    /// Scalar does not fit the target field.
    ValueOutOfRange { field: u32 },
    /// Frame declares more bytes than its length field allows.
    FrameTooLarge { size: usize, max: usize },
    /// Bytes left over after a complete frame.
    TrailingBytes { count: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(m) => write!(f, "bad frame magic {:02x} {:02x}", m[0], m[1]),
            Self::Truncated { offset } => write!(f, "truncated input at offset {}", offset),
            Self::VarintOverflow { offset } => write!(f, "varint overflow at offset {}", offset),
            Self::InvalidKey { offset } => write!(f, "invalid field key at offset {}", offset),
            Self::UnsupportedWireType { field, wire_type } => {
                write!(f, "field {} uses unsupported wire type {}", field, wire_type)
            }
            Self::WrongWireType { field } => write!(f, "field {} has wrong wire type", field),
            Self::ValueOutOfRange { field } => write!(f, "field {} value out of range", field),
            Self::FrameTooLarge { size, max } => {
                write!(f, "frame body of {} bytes exceeds {}", size, max)
            }
            Self::TrailingBytes { count } => write!(f, "{} trailing bytes after frame", count),
        }
    }
}

impl std::error::Error for ProtocolError {}
