//! TDS packet framing.
//!
//! Every handshake message (PRELOGIN, LOGIN7, the server's tabular reply)
//! travels as one or more packets that share an 8-byte header.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Size of the packet header in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest packet size a server may negotiate.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Packet size used until LOGINACK negotiates a different one.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Packet types seen during connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Tabular response from the server (login acknowledgement, errors).
    TabularResult = 0x04,
    /// Attention signal.
    Attention = 0x06,
    /// Federated authentication token.
    FedAuthToken = 0x08,
    /// LOGIN7 record.
    Tds7Login = 0x10,
    /// SSPI blob continuation.
    Sspi = 0x11,
    /// PRELOGIN exchange, also used to tunnel the legacy TLS handshake.
    PreLogin = 0x12,
}

impl PacketType {
    /// Decode a packet type byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x04 => Self::TabularResult,
            0x06 => Self::Attention,
            0x08 => Self::FedAuthToken,
            0x10 => Self::Tds7Login,
            0x11 => Self::Sspi,
            0x12 => Self::PreLogin,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        })
    }
}

bitflags! {
    /// Packet status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets follow.
        const NORMAL = 0x00;
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Ignore this message.
        const IGNORE_EVENT = 0x02;
        /// Reset the session before processing.
        const RESET_CONNECTION = 0x08;
        /// Reset the session but keep the transaction.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

/// The 8-byte header in front of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Message type.
    pub packet_type: PacketType,
    /// Status bits.
    pub status: PacketStatus,
    /// Total length including this header (big-endian on the wire).
    pub length: u16,
    /// Server process id.
    pub spid: u16,
    /// Sequence number within the message, wrapping at 255.
    pub packet_id: u8,
    /// Unused; always zero.
    pub window: u8,
}

impl PacketHeader {
    /// Create a header for a packet carrying `payload_len` bytes.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 1,
            window: 0,
        }
    }

    /// Decode a header, consuming exactly [`PACKET_HEADER_SIZE`] bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let raw_status = src.get_u8();
        let status = PacketStatus::from_bits(raw_status)
            .ok_or(ProtocolError::InvalidPacketStatus(raw_status))?;
        let length = src.get_u16();
        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: length as usize,
            });
        }

        Ok(Self {
            packet_type,
            status,
            length,
            spid: src.get_u16(),
            packet_id: src.get_u8(),
            window: src.get_u8(),
        })
    }

    /// Encode the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Payload bytes following the header.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Whether this packet closes its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the sequence number.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader::new(PacketType::PreLogin, PacketStatus::END_OF_MESSAGE, 47)
            .with_packet_id(3);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);
        assert_eq!(&buf[..4], &[0x12, 0x01, 0x00, 0x2F]);

        let decoded = PacketHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.payload_length(), 39);
        assert!(decoded.is_end_of_message());
    }

    #[test]
    fn test_header_rejects_short_length() {
        let raw = [0x04u8, 0x01, 0x00, 0x04, 0, 0, 1, 0];
        let err = PacketHeader::decode(&mut &raw[..]).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompletePacket { actual: 4, .. }));
    }

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(0x12).unwrap(), PacketType::PreLogin);
        assert_eq!(PacketType::from_u8(0x10).unwrap(), PacketType::Tds7Login);
        assert_eq!(
            PacketType::from_u8(0x01).unwrap_err(),
            ProtocolError::InvalidPacketType(0x01)
        );
    }
}
