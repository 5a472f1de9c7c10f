//! Binary primitives shared by every chunk kind.
//!
//! All integers and floats are little-endian and fixed width. Strings carry
//! a 7-bit variable-length prefix holding the UTF-8 byte count, followed by
//! the bytes themselves.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest chunk identifier accepted on the wire.
pub const MAX_CHUNK_ID_LEN: usize = 8;

/// Errors raised while decoding a frame. Any of them drops the frame that
/// was being decoded, never the connection it arrived on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes remained than a field or record declared.
    #[error("truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes that were left in the buffer.
        remaining: usize,
    },

    /// A string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// A variable-length prefix used more than five bytes.
    #[error("malformed length prefix")]
    MalformedLength,

    /// A chunk identifier was empty or too long.
    #[error("invalid chunk id of length {0}")]
    InvalidId(usize),

    /// An enumerated field held a value with no meaning.
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// The raw value found.
        value: u8,
    },
}

/// A 2D vector as sent by the game.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    /// Horizontal component.
    pub x: f32,
    /// Vertical component.
    pub y: f32,
}

impl Vec2 {
    /// Creates a new vector.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An RGBA color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha.
    pub a: u8,
}

impl Color {
    /// Opaque white.
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    /// Creates a color from its channels.
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Bounds-checked reader over a chunk payload.
#[derive(Debug)]
pub struct ChunkReader<'a> {
    buf: &'a [u8],
}

impl<'a> ChunkReader<'a> {
    /// Wraps a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    /// Any non-zero byte reads as `true`.
    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn i64(&mut self) -> Result<i64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn f32(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn vec2(&mut self) -> Result<Vec2, DecodeError> {
        Ok(Vec2::new(self.f32()?, self.f32()?))
    }

    pub fn color(&mut self) -> Result<Color, DecodeError> {
        self.need(4)?;
        Ok(Color::rgba(
            self.buf.get_u8(),
            self.buf.get_u8(),
            self.buf.get_u8(),
            self.buf.get_u8(),
        ))
    }

    /// 7-bit encoded unsigned integer, at most five bytes.
    pub fn varint(&mut self) -> Result<u32, DecodeError> {
        let mut value = 0u32;
        for i in 0..5 {
            let byte = self.u8()?;
            value |= u32::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::MalformedLength)
    }

    /// Borrows the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.need(len)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.varint()? as usize;
        let raw = self.bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// A count-prefixed list of strings.
    pub fn strings(&mut self) -> Result<Vec<String>, DecodeError> {
        let count = self.varint()? as usize;
        // Every string costs at least one byte, so a count larger than the
        // remaining payload is malformed.
        self.need(count)?;
        (0..count).map(|_| self.string()).collect()
    }
}

/// Growable writer for chunk payloads and whole frames.
#[derive(Debug, Default)]
pub struct ChunkWriter {
    buf: BytesMut,
}

impl ChunkWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn vec2(&mut self, value: Vec2) {
        self.f32(value.x);
        self.f32(value.y);
    }

    pub fn color(&mut self, value: Color) {
        self.buf.put_slice(&[value.r, value.g, value.b, value.a]);
    }

    pub fn varint(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    pub fn string(&mut self, value: &str) {
        self.varint(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn strings(&mut self, values: &[String]) {
        self.varint(values.len() as u32);
        for value in values {
            self.string(value);
        }
    }

    /// Reserves a `u32` length slot and returns its offset for [`Self::patch_len`].
    pub(crate) fn len_placeholder(&mut self) -> usize {
        let at = self.buf.len();
        self.buf.put_u32_le(0);
        at
    }

    /// Fills a slot from [`Self::len_placeholder`] with the bytes written since.
    pub(crate) fn patch_len(&mut self, at: usize) {
        let len = (self.buf.len() - at - 4) as u32;
        self.buf[at..at + 4].copy_from_slice(&len.to_le_bytes());
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_little_endian() {
        let mut writer = ChunkWriter::new();
        writer.u32(0x0102_0304);
        writer.i32(-2);
        let bytes = writer.finish();
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..], &(-2i32).to_le_bytes());
    }

    #[test]
    fn test_varint_uses_seven_bit_groups() {
        let mut writer = ChunkWriter::new();
        writer.varint(300);
        let bytes = writer.finish();
        assert_eq!(&bytes[..], &[0xAC, 0x02]);

        let mut reader = ChunkReader::new(&bytes);
        assert_eq!(reader.varint().unwrap(), 300);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_varint_longer_than_five_bytes_is_rejected() {
        let mut reader = ChunkReader::new(&[0xFF; 6]);
        assert_eq!(reader.varint(), Err(DecodeError::MalformedLength));
    }

    #[test]
    fn test_string_roundtrip_with_multibyte_chars() {
        let mut writer = ChunkWriter::new();
        writer.string("Madeline ★");
        let bytes = writer.finish();

        let mut reader = ChunkReader::new(&bytes);
        assert_eq!(reader.string().unwrap(), "Madeline ★");
    }

    #[test]
    fn test_truncated_string_reports_shortfall() {
        // Prefix claims 10 bytes, only 3 follow.
        let mut reader = ChunkReader::new(&[10, b'a', b'b', b'c']);
        assert_eq!(
            reader.string(),
            Err(DecodeError::Truncated {
                needed: 10,
                remaining: 3
            })
        );
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut reader = ChunkReader::new(&[2, 0xC3, 0x28]);
        assert_eq!(reader.string(), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_string_list_count_bounded_by_payload() {
        // Count of 200 strings but only two bytes left.
        let mut reader = ChunkReader::new(&[200, 1, 0]);
        assert!(matches!(
            reader.strings(),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_length_placeholder_is_patched() {
        let mut writer = ChunkWriter::new();
        let at = writer.len_placeholder();
        writer.string("abc");
        writer.patch_len(at);
        let bytes = writer.finish();
        assert_eq!(&bytes[..4], &4u32.to_le_bytes());
    }
}
