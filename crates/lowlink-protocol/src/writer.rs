//! `WireWriter`: the serializing half of the Wire Codec.
//!
//! Appends primitives to an internal growable buffer in network byte
//! order (big-endian). The reader consumes the same sequence in the
//! same order; there is no tagging or schema on the wire.

use bytes::{BufMut, BytesMut};

use crate::ProtocolError;

/// Serializes primitives into a growable byte buffer.
///
/// All multi-byte integers are written big-endian. Strings are written
/// as a u16 byte-length prefix followed by their UTF-8 bytes, which
/// bounds a single string to 65535 bytes. Raw byte spans are written
/// verbatim with no prefix — the reader must know their length.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Creates a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    /// Writes a bool as a single byte: 1 for true, 0 for false.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Writes a string as a u16 byte-length prefix plus UTF-8 bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::StringTooLong`] if the UTF-8 encoding
    /// exceeds 65535 bytes. Nothing is written in that case.
    pub fn write_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        let bytes = value.as_bytes();
        let len = u16::try_from(bytes.len())
            .map_err(|_| ProtocolError::StringTooLong(bytes.len()))?;
        self.buf.put_u16(len);
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Writes a raw byte span with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Clears the buffer so the writer can be reused.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Borrows the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, yielding the written bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_u16_is_big_endian() {
        let mut w = WireWriter::new();
        w.write_u16(0x1234);
        assert_eq!(w.as_slice(), &[0x12, 0x34]);
    }

    #[test]
    fn test_write_u32_is_big_endian() {
        let mut w = WireWriter::new();
        w.write_u32(0xDEAD_BEEF);
        assert_eq!(w.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_write_bool_is_one_byte() {
        let mut w = WireWriter::new();
        w.write_bool(true);
        w.write_bool(false);
        assert_eq!(w.as_slice(), &[1, 0]);
    }

    #[test]
    fn test_write_string_prefixes_byte_length() {
        let mut w = WireWriter::new();
        w.write_string("hi").unwrap();
        assert_eq!(w.as_slice(), &[0, 2, b'h', b'i']);
    }

    #[test]
    fn test_write_string_at_max_length_succeeds() {
        let mut w = WireWriter::new();
        let s = "x".repeat(65535);
        w.write_string(&s).unwrap();
        assert_eq!(w.len(), 2 + 65535);
    }

    #[test]
    fn test_write_string_over_max_length_fails_and_writes_nothing() {
        let mut w = WireWriter::new();
        let s = "x".repeat(65536);
        let result = w.write_string(&s);
        assert_eq!(result, Err(ProtocolError::StringTooLong(65536)));
        assert!(w.is_empty(), "failed write must not touch the buffer");
    }

    #[test]
    fn test_write_bytes_has_no_prefix() {
        let mut w = WireWriter::new();
        w.write_bytes(&[9, 8, 7]);
        assert_eq!(w.as_slice(), &[9, 8, 7]);
    }

    #[test]
    fn test_clear_allows_reuse() {
        let mut w = WireWriter::new();
        w.write_u64(42);
        w.clear();
        assert!(w.is_empty());
        w.write_u8(1);
        assert_eq!(w.as_slice(), &[1]);
    }
}
