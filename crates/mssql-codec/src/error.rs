//! Codec error types.

use thiserror::Error;

/// Errors raised while framing TDS packets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed packet contents.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_protocol::ProtocolError),

    /// A packet header announced a length shorter than the header itself.
    #[error("invalid packet header")]
    InvalidHeader,

    /// A packet exceeds the negotiated size.
    #[error("packet of {size} bytes exceeds the maximum of {max}")]
    PacketTooLarge {
        /// Announced size.
        size: usize,
        /// Accepted maximum.
        max: usize,
    },

    /// The peer closed the transport mid-message.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A message of a different type arrived.
    #[error("expected {expected:?} message, received {actual:?}")]
    UnexpectedMessage {
        /// Type the caller was waiting for.
        expected: tds_protocol::PacketType,
        /// Type received.
        actual: tds_protocol::PacketType,
    },

    /// Bytes remained buffered when the transport was released.
    #[error("{0} unread bytes left in the framing buffer")]
    TrailingData(usize),
}

impl CodecError {
    /// Whether the failure came from the transport rather than the data.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}
