//! UTF-16 string helpers shared by LOGIN7 and the login-response tokens.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16(src: &mut impl Buf, char_count: usize) -> Result<String, ProtocolError> {
    if src.remaining() < char_count * 2 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Read a string prefixed with a one-byte character count.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u8() as usize;
    read_utf16(src, len)
}

/// Read a string prefixed with a two-byte little-endian character count.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u16_le() as usize;
    read_utf16(src, len)
}

/// Write a string as UTF-16LE with no length prefix.
pub fn write_utf16(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Write a string prefixed with a one-byte character count.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u8::MAX as usize).collect();
    dst.put_u8(units.len() as u8);
    for unit in units {
        dst.put_u16_le(unit);
    }
}

/// Number of UTF-16 code units in `s`.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}
