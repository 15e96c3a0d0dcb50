// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagged-field read/write cursors.
//!
//! Field keys are `(field_number << 3) | wire_type`. Only the two wire types
//! the envelope uses are produced; the reader can additionally skip 32/64-bit
//! fixed fields it does not know about.

use super::ProtocolError;

/// Varint-encoded scalar.
pub const WIRE_VARINT: u8 = 0;
/// 64-bit little-endian fixed field (skipped only).
pub const WIRE_FIXED64: u8 = 1;
/// Length-delimited bytes or nested message.
pub const WIRE_LENGTH_DELIMITED: u8 = 2;
/// 32-bit little-endian fixed field (skipped only).
pub const WIRE_FIXED32: u8 = 5;

/// Longest legal varint (10 * 7 bits >= 64 bits).
const MAX_VARINT_LEN: usize = 10;

#[inline]
pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Append-only writer.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buffer: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buffer.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buffer.push(value as u8);
    }

    fn write_key(&mut self, field: u32, wire_type: u8) {
        self.write_varint((u64::from(field) << 3) | u64::from(wire_type));
    }

    pub fn write_uint(&mut self, field: u32, value: u64) {
        self.write_key(field, WIRE_VARINT);
        self.write_varint(value);
    }

    pub fn write_sint(&mut self, field: u32, value: i64) {
        self.write_key(field, WIRE_VARINT);
        self.write_varint(zigzag_encode(value));
    }

    pub fn write_bytes(&mut self, field: u32, data: &[u8]) {
        self.write_key(field, WIRE_LENGTH_DELIMITED);
        self.write_varint(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

/// One decoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    /// A fixed-width field; its value is not interpreted.
    Fixed,
}

/// Bounds-checked reader over an encoded body.
pub struct FieldReader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    pub fn read_varint(&mut self) -> Result<u64, ProtocolError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = *self
                .buffer
                .get(self.offset)
                .ok_or(ProtocolError::Truncated {
                    offset: self.offset,
                })?;
            self.offset += 1;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtocolError::VarintOverflow {
            offset: self.offset,
        })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(ProtocolError::Truncated {
                offset: self.offset,
            })?;
        let slice = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Next `(field_number, value)`, or `None` at the end of the buffer.
    pub fn next_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>, ProtocolError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let key_offset = self.offset;
        let key = self.read_varint()?;
        let field = u32::try_from(key >> 3).map_err(|_| ProtocolError::InvalidKey {
            offset: key_offset,
        })?;
        if field == 0 {
            return Err(ProtocolError::InvalidKey { offset: key_offset });
        }
        let value = match (key & 0x7) as u8 {
            WIRE_VARINT => FieldValue::Varint(self.read_varint()?),
            WIRE_LENGTH_DELIMITED => {
                let len = usize::try_from(self.read_varint()?).map_err(|_| {
                    ProtocolError::Truncated {
                        offset: self.offset,
                    }
                })?;
                FieldValue::Bytes(self.take(len)?)
            }
            WIRE_FIXED64 => {
                self.take(8)?;
                FieldValue::Fixed
            }
            WIRE_FIXED32 => {
                self.take(4)?;
                FieldValue::Fixed
            }
            other => {
                return Err(ProtocolError::UnsupportedWireType {
                    field,
                    wire_type: other,
                })
            }
        };
        Ok(Some((field, value)))
    }
}
