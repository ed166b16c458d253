//! Protobuf wire-format primitives.
//!
//! Minimal proto3 encoding: varints, length-delimited fields, and
//! little-endian fixed32 floats. Unknown fields are skippable so firmware
//! additions don't break decoding.

use crate::error::{Result, WireError};

pub const WT_VARINT: u8 = 0;
pub const WT_FIXED64: u8 = 1;
pub const WT_LEN: u8 = 2;
pub const WT_FIXED32: u8 = 5;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn put_tag(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Emit a uint32/enum field, skipping the proto3 default of zero.
pub fn put_uint32(buf: &mut Vec<u8>, field: u32, value: u32) {
    if value != 0 {
        put_tag(buf, field, WT_VARINT);
        put_varint(buf, u64::from(value));
    }
}

/// Emit a bool field, skipping `false`.
pub fn put_bool(buf: &mut Vec<u8>, field: u32, value: bool) {
    if value {
        put_tag(buf, field, WT_VARINT);
        buf.push(0x01);
    }
}

/// Emit a float field, skipping `0.0`.
pub fn put_float(buf: &mut Vec<u8>, field: u32, value: f32) {
    if value != 0.0 {
        put_tag(buf, field, WT_FIXED32);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// Emit a length-delimited submessage field. Always present, even when
/// empty; presence is how unit request messages are expressed.
pub fn put_message(buf: &mut Vec<u8>, field: u32, body: &[u8]) {
    put_tag(buf, field, WT_LEN);
    put_varint(buf, body.len() as u64);
    buf.extend_from_slice(body);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// One decoded field value.
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Bytes(&'a [u8]),
}

impl<'a> Value<'a> {
    pub fn varint(&self, field: u32) -> Result<u64> {
        match self {
            Value::Varint(v) => Ok(*v),
            _ => Err(self.type_error(field)),
        }
    }

    pub fn uint32(&self, field: u32) -> Result<u32> {
        Ok(self.varint(field)? as u32)
    }

    pub fn boolean(&self, field: u32) -> Result<bool> {
        Ok(self.varint(field)? != 0)
    }

    pub fn float(&self, field: u32) -> Result<f32> {
        match self {
            Value::Fixed32(v) => Ok(f32::from_bits(*v)),
            _ => Err(self.type_error(field)),
        }
    }

    pub fn bytes(&self, field: u32) -> Result<&'a [u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(self.type_error(field)),
        }
    }

    fn type_error(&self, field: u32) -> WireError {
        let wire_type = match self {
            Value::Varint(_) => WT_VARINT,
            Value::Fixed64(_) => WT_FIXED64,
            Value::Fixed32(_) => WT_FIXED32,
            Value::Bytes(_) => WT_LEN,
        };
        WireError::UnexpectedWireType { field, wire_type }
    }
}

/// Streaming field reader over a message body.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read the next `(field, value)` pair, or `None` at end of input.
    pub fn next_field(&mut self) -> Result<Option<(u32, Value<'a>)>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let key = self.read_varint()?;
        let field = (key >> 3) as u32;
        let wire_type = (key & 0x07) as u8;
        let value = match wire_type {
            WT_VARINT => Value::Varint(self.read_varint()?),
            WT_FIXED64 => {
                let bytes = self.take(8)?;
                Value::Fixed64(u64::from_le_bytes(bytes.try_into().unwrap()))
            }
            WT_FIXED32 => {
                let bytes = self.take(4)?;
                Value::Fixed32(u32::from_le_bytes(bytes.try_into().unwrap()))
            }
            WT_LEN => {
                let len = self.read_varint()? as usize;
                Value::Bytes(self.take(len)?)
            }
            other => {
                return Err(WireError::UnexpectedWireType {
                    field,
                    wire_type: other,
                })
            }
        };
        Ok(Some((field, value)))
    }

    fn read_varint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value: u64 = 0;
        for shift in (0..70).step_by(7) {
            let Some(&byte) = self.data.get(self.pos) else {
                return Err(WireError::InvalidVarint { offset: start });
            };
            self.pos += 1;
            if shift >= 64 {
                return Err(WireError::InvalidVarint { offset: start });
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::InvalidVarint { offset: start })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(WireError::TruncatedField { offset: start })?;
        self.pos = end;
        Ok(&self.data[start..end])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, 0xFFFF_FFFF, u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.read_varint().unwrap(), value);
        }
    }

    #[test]
    fn varint_known_encoding() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
    }

    #[test]
    fn field_reader_walks_mixed_fields() {
        let mut buf = Vec::new();
        put_uint32(&mut buf, 1, 42);
        put_float(&mut buf, 2, 1.5);
        put_message(&mut buf, 3, &[0x08, 0x01]);
        put_bool(&mut buf, 4, true);

        let mut reader = Reader::new(&buf);
        let (field, value) = reader.next_field().unwrap().unwrap();
        assert_eq!(field, 1);
        assert_eq!(value.uint32(field).unwrap(), 42);

        let (field, value) = reader.next_field().unwrap().unwrap();
        assert_eq!(field, 2);
        assert_eq!(value.float(field).unwrap(), 1.5);

        let (field, value) = reader.next_field().unwrap().unwrap();
        assert_eq!(field, 3);
        assert_eq!(value.bytes(field).unwrap(), &[0x08, 0x01]);

        let (field, value) = reader.next_field().unwrap().unwrap();
        assert_eq!(field, 4);
        assert!(value.boolean(field).unwrap());

        assert!(reader.next_field().unwrap().is_none());
    }

    #[test]
    fn defaults_are_omitted() {
        let mut buf = Vec::new();
        put_uint32(&mut buf, 1, 0);
        put_bool(&mut buf, 2, false);
        put_float(&mut buf, 3, 0.0);
        assert!(buf.is_empty());
    }

    #[test]
    fn truncated_length_field_errors() {
        let mut buf = Vec::new();
        put_tag(&mut buf, 1, WT_LEN);
        put_varint(&mut buf, 10); // claims 10 bytes, none follow
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            reader.next_field(),
            Err(WireError::TruncatedField { .. })
        ));
    }

    #[test]
    fn oversized_varint_errors() {
        let buf = [0xFF; 11];
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            reader.read_varint(),
            Err(WireError::InvalidVarint { .. })
        ));
    }
}
