//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire structures.
///
/// These are always terminal for a connection attempt: they indicate that
/// client and server disagree about the byte layout of a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Input ended before a complete structure could be read.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A packet was shorter than its header claims.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Unknown packet status bits.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// A PreLogin option points outside the payload.
    #[error("pre-login option 0x{option:02X} points outside the payload (offset {offset}, length {length})")]
    PreLoginOptionOutOfBounds {
        /// Option id.
        option: u8,
        /// Absolute offset from the start of the payload.
        offset: u16,
        /// Declared length.
        length: u16,
    },

    /// The ENCRYPTION option carried an unknown value.
    #[error("invalid ENCRYPTION value in pre-login message: 0x{0:02X}")]
    InvalidEncryptionValue(u8),

    /// The FEDAUTHREQUIRED option carried a value other than 0 or 1.
    #[error("invalid FEDAUTHREQUIRED value in pre-login response: 0x{0:02X}")]
    InvalidFedAuthRequired(u8),

    /// The MARS option carried a value other than 0 or 1.
    #[error("invalid MARS value in pre-login response: 0x{0:02X}")]
    InvalidMarsValue(u8),

    /// Unknown token type in a tabular result.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// A token carried a field that could not be interpreted.
    #[error("invalid {token} token: {reason}")]
    InvalidToken {
        /// Token name.
        token: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// A string field was not valid for its declared encoding.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// A variable-length LOGIN7 field exceeds what the fixed header can address.
    #[error("login field {field} is too long ({len} bytes)")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Encoded length in bytes.
        len: usize,
    },
}
