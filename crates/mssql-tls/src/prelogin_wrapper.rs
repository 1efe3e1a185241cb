//! TLS handshake tunneled through PRELOGIN packets.
//!
//! Outside TLS-first mode the handshake records travel as the payload of
//! PRELOGIN (0x12) packets. Once the handshake is over the same socket
//! carries TLS records directly, so the wrapper turns into a pass-through.
//! The switch is one-way.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use tds_protocol::packet::{
    DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Frames TLS handshake bytes in PRELOGIN packets.
///
/// Used symmetrically: the client wraps its socket before calling the TLS
/// connector, and a server can wrap its accepted socket the same way.
#[derive(Debug)]
pub struct TlsPreloginWrapper<S> {
    stream: S,
    tunneling: bool,

    header: [u8; PACKET_HEADER_SIZE],
    header_read: usize,
    payload_left: usize,

    pending: Vec<u8>,
    framed: BytesMut,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap `stream` in tunneling mode.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            tunneling: true,
            header: [0; PACKET_HEADER_SIZE],
            header_read: 0,
            payload_left: 0,
            pending: Vec::new(),
            framed: BytesMut::new(),
        }
    }

    /// Stop framing; further I/O goes straight to the transport.
    pub fn handshake_complete(&mut self) {
        tracing::trace!("PRELOGIN tunnel closed, switching to raw TLS records");
        self.tunneling = false;
    }

    /// Whether bytes are still being framed.
    pub fn is_tunneling(&self) -> bool {
        self.tunneling
    }

    /// Borrow the transport.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutably borrow the transport.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Release the transport.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn frame_pending(&mut self) {
        let chunk = DEFAULT_PACKET_SIZE - PACKET_HEADER_SIZE;
        let mut packet_id = 1u8;
        let mut rest = self.pending.as_slice();
        while !rest.is_empty() {
            let take = rest.len().min(chunk);
            let status = if take == rest.len() {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            // take <= chunk, so the total fits the packet size.
            let header = PacketHeader::new(
                PacketType::PreLogin,
                status,
                (PACKET_HEADER_SIZE + take) as u16,
            )
            .with_packet_id(packet_id);
            header.encode(&mut self.framed);
            self.framed.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            packet_id = packet_id.checked_add(1).unwrap_or(1);
        }
        tracing::trace!(
            tls_bytes = self.pending.len(),
            framed = self.framed.len(),
            "framed TLS handshake bytes"
        );
        self.pending.clear();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.tunneling {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        while this.payload_left == 0 {
            while this.header_read < PACKET_HEADER_SIZE {
                let mut header = ReadBuf::new(&mut this.header[this.header_read..]);
                ready!(Pin::new(&mut this.stream).poll_read(cx, &mut header))?;
                let n = header.filled().len();
                if n == 0 {
                    if this.header_read == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                }
                this.header_read += n;
            }

            let header = PacketHeader::decode(&mut &this.header[..])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if header.packet_type != PacketType::PreLogin {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected PRELOGIN packet during TLS handshake, got {:?}",
                        header.packet_type
                    ),
                )));
            }
            this.header_read = 0;
            this.payload_left = header.payload_length();
        }

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let want = this.payload_left.min(buf.remaining());
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(want));
        ready!(Pin::new(&mut this.stream).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
        }
        buf.advance(n);
        this.payload_left -= n;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.tunneling {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }
        // Buffered until flush so one TLS flight becomes one message.
        this.pending.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.framed.is_empty() && !this.pending.is_empty() {
            this.frame_pending();
        }
        while this.framed.has_remaining() {
            let n = ready!(Pin::new(&mut this.stream).poll_write(cx, &this.framed))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.framed.advance(n);
        }
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn prelogin_packet(payload: &[u8], eom: bool) -> Vec<u8> {
        let status = if eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let mut out = BytesMut::new();
        PacketHeader::new(
            PacketType::PreLogin,
            status,
            (PACKET_HEADER_SIZE + payload.len()) as u16,
        )
        .encode(&mut out);
        out.extend_from_slice(payload);
        out.to_vec()
    }

    #[tokio::test]
    async fn test_writes_are_framed_on_flush() {
        let (client, mut peer) = duplex(64 * 1024);
        let mut wrapper = TlsPreloginWrapper::new(client);

        wrapper.write_all(b"client").await.unwrap();
        wrapper.write_all(b"hello").await.unwrap();
        wrapper.flush().await.unwrap();

        let mut packet = [0u8; PACKET_HEADER_SIZE + 11];
        peer.read_exact(&mut packet).await.unwrap();
        assert_eq!(packet[0], PacketType::PreLogin as u8);
        assert_eq!(packet[1], PacketStatus::END_OF_MESSAGE.bits());
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 19);
        assert_eq!(&packet[PACKET_HEADER_SIZE..], b"clienthello");
    }

    #[tokio::test]
    async fn test_large_flight_spans_packets() {
        let (client, mut peer) = duplex(64 * 1024);
        let mut wrapper = TlsPreloginWrapper::new(client);
        let flight = vec![0x16; DEFAULT_PACKET_SIZE * 2];
        wrapper.write_all(&flight).await.unwrap();
        wrapper.flush().await.unwrap();
        drop(wrapper);

        let mut raw = Vec::new();
        peer.read_to_end(&mut raw).await.unwrap();
        // Three packets: two full, one with the remainder.
        assert_eq!(raw.len(), flight.len() + 3 * PACKET_HEADER_SIZE);
        assert_eq!(raw[1], PacketStatus::NORMAL.bits());
        assert_eq!(raw[6], 1);
        let second = DEFAULT_PACKET_SIZE;
        assert_eq!(raw[second + 6], 2);
    }

    #[tokio::test]
    async fn test_reads_unwrap_payloads() {
        let (client, mut peer) = duplex(64 * 1024);
        let mut wrapper = TlsPreloginWrapper::new(client);

        peer.write_all(&prelogin_packet(b"server", false)).await.unwrap();
        peer.write_all(&prelogin_packet(b"hello", true)).await.unwrap();

        let mut out = [0u8; 11];
        wrapper.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"serverhello");
    }

    #[tokio::test]
    async fn test_rejects_other_packet_types() {
        let (client, mut peer) = duplex(4096);
        let mut wrapper = TlsPreloginWrapper::new(client);

        let mut packet = prelogin_packet(b"x", true);
        packet[0] = PacketType::TabularResult as u8;
        peer.write_all(&packet).await.unwrap();

        let mut out = [0u8; 1];
        let err = wrapper.read_exact(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_pass_through_after_handshake() {
        let (client, mut peer) = duplex(4096);
        let mut wrapper = TlsPreloginWrapper::new(client);
        wrapper.handshake_complete();
        assert!(!wrapper.is_tunneling());

        wrapper.write_all(b"raw").await.unwrap();
        wrapper.flush().await.unwrap();
        let mut out = [0u8; 3];
        peer.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"raw");

        peer.write_all(b"back").await.unwrap();
        let mut out = [0u8; 4];
        wrapper.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"back");
    }
}
