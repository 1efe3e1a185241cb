//! Message reassembly.
//!
//! A message is one or more packets of the same type; the last carries
//! `END_OF_MESSAGE`.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::PacketType;

use crate::packet_codec::Packet;

/// A complete message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Type of the packets that carried it.
    pub packet_type: PacketType,
    /// Concatenated payloads.
    pub payload: Bytes,
}

impl Message {
    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Buffers packets until a message is complete.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// An empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a packet; returns the message once its last packet arrives.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self.packet_type.get_or_insert(packet.header.packet_type);
        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            ?packet_type,
            packet_count = self.packet_count,
            buffered = self.buffer.len(),
            "assembling message"
        );

        if !packet.is_end_of_message() {
            return None;
        }

        self.packet_type = None;
        self.packet_count = 0;
        Some(Message {
            packet_type,
            payload: self.buffer.split().freeze(),
        })
    }

    /// Whether a message is partially buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Packets buffered for the current message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}
