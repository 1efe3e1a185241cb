//! Message-level I/O over a framed transport.

use std::fmt;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::PacketType;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::CodecError;
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::{INITIAL_PACKET_SIZE, Packet, TdsCodec, split_message};

/// Sends and receives whole TDS messages over `T`.
///
/// Outgoing payloads are split at the current packet size. The transport can
/// be taken back with [`PacketStream::into_inner`] once no data is buffered,
/// which is how the stream is swapped when encryption starts or stops.
pub struct PacketStream<T> {
    inner: Framed<T, TdsCodec>,
    assembler: MessageAssembler,
    packet_size: usize,
}

impl<T> PacketStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a transport using the initial 4096-byte packet size.
    pub fn new(transport: T) -> Self {
        Self {
            inner: Framed::new(transport, TdsCodec::new()),
            assembler: MessageAssembler::new(),
            packet_size: INITIAL_PACKET_SIZE,
        }
    }

    /// Packet size used for outgoing messages.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Change the outgoing packet size, usually after the server confirms one.
    pub fn set_packet_size(&mut self, size: usize) {
        self.packet_size = size;
    }

    /// Send `payload` as one message of `packet_type`.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<(), CodecError> {
        self.inner.codec_mut().reset_packet_id();
        let packets = split_message(packet_type, payload, self.packet_size);
        tracing::debug!(?packet_type, packets = packets.len(), "sending message");
        for packet in packets {
            self.inner.feed(packet).await?;
        }
        SinkExt::<Packet>::flush(&mut self.inner).await
    }

    /// Read the next complete message.
    pub async fn read_message(&mut self) -> Result<Message, CodecError> {
        loop {
            let packet = self
                .inner
                .next()
                .await
                .ok_or(CodecError::ConnectionClosed)??;
            if let Some(message) = self.assembler.push(packet) {
                tracing::debug!(
                    packet_type = ?message.packet_type,
                    len = message.len(),
                    "received message"
                );
                return Ok(message);
            }
        }
    }

    /// Read a message and require it to be of `expected` type.
    pub async fn read_message_of(&mut self, expected: PacketType) -> Result<Message, CodecError> {
        let message = self.read_message().await?;
        if message.packet_type != expected {
            return Err(CodecError::UnexpectedMessage {
                expected,
                actual: message.packet_type,
            });
        }
        Ok(message)
    }

    /// Borrow the transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Mutably borrow the transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Release the transport. Fails if received bytes are still buffered,
    /// since they would be lost.
    pub fn into_inner(self) -> Result<T, CodecError> {
        let buffered = self.inner.read_buffer().len();
        if buffered > 0 || self.assembler.has_partial() {
            return Err(CodecError::TrailingData(buffered));
        }
        Ok(self.inner.into_inner())
    }
}

impl<T: fmt::Debug> fmt::Debug for PacketStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketStream")
            .field("transport", self.inner.get_ref())
            .field("packet_size", &self.packet_size)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_large_message_is_split_and_reassembled() {
        let (client, server) = duplex(64 * 1024);
        let mut client = PacketStream::new(client);
        let mut server = PacketStream::new(server);
        client.set_packet_size(512);

        let payload = Bytes::from(vec![0xA5; 2000]);
        client
            .send_message(PacketType::Tds7Login, payload.clone())
            .await
            .unwrap();

        let message = server.read_message_of(PacketType::Tds7Login).await.unwrap();
        assert_eq!(message.payload, payload);
    }

    #[tokio::test]
    async fn test_unexpected_message_type() {
        let (client, server) = duplex(4096);
        let mut client = PacketStream::new(client);
        let mut server = PacketStream::new(server);

        client
            .send_message(PacketType::PreLogin, Bytes::from_static(&[0xFF]))
            .await
            .unwrap();
        let err = server
            .read_message_of(PacketType::TabularResult)
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedMessage { .. }));
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let (client, server) = duplex(4096);
        drop(client);
        let mut server = PacketStream::new(server);
        assert!(server.read_message().await.unwrap_err().is_io());
    }

    #[tokio::test]
    async fn test_into_inner_returns_clean_transport() {
        let (client, mut peer) = duplex(4096);
        let mut stream = PacketStream::new(client);
        stream
            .send_message(PacketType::PreLogin, Bytes::from_static(&[0xFF]))
            .await
            .unwrap();

        let mut raw = stream.into_inner().unwrap();
        let mut header = [0u8; 9];
        peer.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], PacketType::PreLogin as u8);

        raw.write_all(b"x").await.unwrap();
        let mut byte = [0u8; 1];
        peer.read_exact(&mut byte).await.unwrap();
        assert_eq!(&byte, b"x");
    }
}
