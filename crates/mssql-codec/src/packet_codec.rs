//! TDS packet codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tds_protocol::packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// A single TDS packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload following the header.
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet. The header length is filled in at encode time.
    #[must_use]
    pub fn new(packet_type: PacketType, status: PacketStatus, payload: Bytes) -> Self {
        Self {
            header: PacketHeader::new(packet_type, status, 0),
            payload,
        }
    }

    /// Header plus payload size.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Split a message payload into packets no larger than `packet_size`.
///
/// Only the last packet carries `END_OF_MESSAGE`. An empty payload still
/// yields one packet.
#[must_use]
pub fn split_message(packet_type: PacketType, mut payload: Bytes, packet_size: usize) -> Vec<Packet> {
    let chunk = packet_size
        .clamp(PACKET_HEADER_SIZE + 1, MAX_PACKET_SIZE)
        .saturating_sub(PACKET_HEADER_SIZE);
    let mut packets = Vec::with_capacity(payload.len() / chunk + 1);
    loop {
        let take = payload.len().min(chunk);
        let body = payload.split_to(take);
        let last = payload.is_empty();
        let status = if last {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        packets.push(Packet::new(packet_type, status, body));
        if last {
            return packets;
        }
    }
}

/// Packet framing for `tokio_util::codec`.
#[derive(Debug)]
pub struct TdsCodec {
    max_packet_size: usize,
    packet_id: u8,
}

impl TdsCodec {
    /// A codec accepting packets up to the protocol maximum.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            packet_id: 1,
        }
    }

    /// Cap the accepted packet size.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.clamp(PACKET_HEADER_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Accepted packet size.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn next_packet_id(&mut self) -> u8 {
        let id = self.packet_id;
        // Id 0 is never sent; wrap from 255 back to 1.
        self.packet_id = self.packet_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Restart numbering at 1, done at the start of each request.
    pub fn reset_packet_id(&mut self) {
        self.packet_id = 1;
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let length = usize::from(u16::from_be_bytes([src[2], src[3]]));
        if length < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidHeader);
        }
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length).freeze();
        let header = PacketHeader::decode(&mut frame)?;
        let payload = frame.copy_to_bytes(frame.remaining());

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            eom = header.is_end_of_message(),
            "decoded packet"
        );

        Ok(Some(Packet { header, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(CodecError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.total_size();
        if total > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total,
                max: self.max_packet_size,
            });
        }

        let mut header = item.header;
        // Bounded by max_packet_size above.
        header.length = total as u16;
        header.packet_id = self.next_packet_id();

        dst.reserve(total);
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total,
            packet_id = header.packet_id,
            "encoded packet"
        );
        Ok(())
    }
}

/// Packet size used until the server confirms another.
pub const INITIAL_PACKET_SIZE: usize = DEFAULT_PACKET_SIZE;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn raw_packet(packet_type: PacketType, length: u16, payload: &[u8]) -> BytesMut {
        let mut data = BytesMut::new();
        data.put_u8(packet_type as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(length);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(payload);
        data
    }

    #[test]
    fn test_decode_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::PreLogin, 12, b"\x00\x01\x02\xFF");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::PreLogin);
        assert!(packet.is_end_of_message());
        assert_eq!(&packet.payload[..], b"\x00\x01\x02\xFF");
        assert!(data.is_empty());
    }

    #[test]
    fn test_partial_packet_waits() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::TabularResult, 12, b"ab");
        assert!(codec.decode(&mut data).unwrap().is_none());

        data.put_slice(b"cd");
        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(&packet.payload[..], b"abcd");
    }

    #[test]
    fn test_truncated_stream_at_eof() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::TabularResult, 12, b"ab");
        assert!(matches!(
            codec.decode_eof(&mut data),
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_rejects_short_length() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::TabularResult, 4, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::InvalidHeader)
        ));
    }

    #[test]
    fn test_rejects_oversized_packet() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let mut data = raw_packet(PacketType::TabularResult, 4096, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::PacketTooLarge { size: 4096, max: 512 })
        ));
    }

    #[test]
    fn test_encode_assigns_length_and_ids() {
        let mut codec = TdsCodec::new();
        let mut dst = BytesMut::new();
        for _ in 0..2 {
            let packet = Packet::new(
                PacketType::Tds7Login,
                PacketStatus::END_OF_MESSAGE,
                Bytes::from_static(b"test"),
            );
            codec.encode(packet, &mut dst).unwrap();
        }

        assert_eq!(dst.len(), 24);
        assert_eq!(dst[0], PacketType::Tds7Login as u8);
        assert_eq!(u16::from_be_bytes([dst[2], dst[3]]), 12);
        assert_eq!(dst[6], 1);
        assert_eq!(dst[12 + 6], 2);
    }

    #[test]
    fn test_packet_id_skips_zero() {
        let mut codec = TdsCodec::new();
        codec.packet_id = 255;
        assert_eq!(codec.next_packet_id(), 255);
        assert_eq!(codec.next_packet_id(), 1);
    }

    #[test]
    fn test_split_message() {
        let payload = Bytes::from(vec![7u8; 20]);
        let packets = split_message(PacketType::Tds7Login, payload, PACKET_HEADER_SIZE + 8);

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].payload.len(), 8);
        assert_eq!(packets[2].payload.len(), 4);
        assert!(!packets[0].is_end_of_message());
        assert!(!packets[1].is_end_of_message());
        assert!(packets[2].is_end_of_message());
    }

    #[test]
    fn test_split_empty_message() {
        let packets = split_message(PacketType::PreLogin, Bytes::new(), INITIAL_PACKET_SIZE);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_end_of_message());
    }
}
