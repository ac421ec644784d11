//! Primitive field codec.
//!
//! Integers are big-endian, strings are 64 bytes padded with spaces,
//! coordinates are fixed-point with 5 fractional bits and angles are a byte
//! fraction of a full turn.

use crate::error::ProtocolError;
use crate::STRING_LENGTH;

/// Fixed-point scale of world coordinates.
pub const FIXED_SCALE: f32 = 32.0;

pub fn to_fixed(value: f32) -> i32 {
    (value * FIXED_SCALE).round() as i32
}

pub fn from_fixed(value: i32) -> f32 {
    value as f32 / FIXED_SCALE
}

/// Converts degrees to a byte fraction of a turn, wrapping at 360.
pub fn angle_to_byte(degrees: f32) -> u8 {
    ((degrees * 256.0 / 360.0).round() as i32).rem_euclid(256) as u8
}

pub fn byte_to_angle(value: u8) -> f32 {
    value as f32 * 360.0 / 256.0
}

/// Right-pads `text` with spaces to the fixed string width.
///
/// Longer input is truncated and non-ASCII characters become `?`.
pub fn pad_string(text: &str) -> [u8; STRING_LENGTH] {
    let mut out = [b' '; STRING_LENGTH];
    for (slot, ch) in out.iter_mut().zip(text.chars()) {
        *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
    out
}

/// Strips the space padding from a fixed-width string field.
pub fn trim_string(raw: &[u8]) -> String {
    let end = raw
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    raw[..end].iter().map(|&b| b as char).collect()
}

/// Cursor over a packet payload.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let available = self.buf.len() - self.pos;
        if available < len {
            return Err(ProtocolError::ShortRead {
                needed: len,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        Ok(trim_string(self.take(STRING_LENGTH)?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(len)
    }

    /// Reads a coordinate, 16 bits wide unless extended positions are active.
    pub fn read_coord(&mut self, extended: bool) -> Result<i32, ProtocolError> {
        if extended {
            self.read_i32()
        } else {
            Ok(self.read_i16()? as i32)
        }
    }
}

/// Growable packet buffer.
#[derive(Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new(id: u8) -> Self {
        let mut buf = Vec::with_capacity(STRING_LENGTH + 8);
        buf.push(id);
        Self { buf }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.buf.push(value as u8);
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_string(&mut self, text: &str) -> &mut Self {
        self.buf.extend_from_slice(&pad_string(text));
        self
    }

    /// Writes `data` zero-padded (or truncated) to exactly `len` bytes.
    pub fn write_bytes(&mut self, data: &[u8], len: usize) -> &mut Self {
        let used = data.len().min(len);
        self.buf.extend_from_slice(&data[..used]);
        self.buf.resize(self.buf.len() + (len - used), 0);
        self
    }

    pub fn write_coord(&mut self, value: i32, extended: bool) -> &mut Self {
        if extended {
            self.write_i32(value)
        } else {
            self.write_i16(value.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
