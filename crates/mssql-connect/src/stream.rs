//! The connection's stream slot.
//!
//! The framing in use changes during the handshake: plain packets, TLS
//! from the first byte, or TLS whose handshake was tunneled through
//! PRELOGIN packets. The slot owns exactly one of them and is swapped in
//! place as TLS is added or, for login-only encryption, removed again.

use std::fmt;

use bytes::Bytes;
use mssql_codec::{Message, PacketStream};
use mssql_tls::{TlsPreloginWrapper, TlsStream};
use tds_protocol::PacketType;

use crate::error::{Error, Result};
use crate::transport::BoxedTransport;

/// Framed stream currently owned by a connection attempt.
#[derive(Default)]
pub enum StreamSlot {
    /// No transport yet, or the stream was moved out.
    #[default]
    Empty,
    /// Plain TDS packets.
    Raw(PacketStream<BoxedTransport>),
    /// TLS negotiated before any TDS traffic.
    Tls(PacketStream<TlsStream<BoxedTransport>>),
    /// TLS whose handshake was tunneled through PRELOGIN packets.
    Tunneled(PacketStream<TlsStream<TlsPreloginWrapper<BoxedTransport>>>),
}

impl StreamSlot {
    /// Wrap a freshly opened transport.
    #[must_use]
    pub fn raw(transport: BoxedTransport) -> Self {
        Self::Raw(PacketStream::new(transport))
    }

    /// Move the stream out, leaving the slot empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Whether a stream is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Whether traffic is currently encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Tls(_) | Self::Tunneled(_))
    }

    /// Send one message.
    pub async fn send_message(&mut self, packet_type: PacketType, payload: Bytes) -> Result<()> {
        match self {
            Self::Empty => Err(no_stream()),
            Self::Raw(s) => Ok(s.send_message(packet_type, payload).await?),
            Self::Tls(s) => Ok(s.send_message(packet_type, payload).await?),
            Self::Tunneled(s) => Ok(s.send_message(packet_type, payload).await?),
        }
    }

    /// Read one message.
    pub async fn read_message(&mut self) -> Result<Message> {
        match self {
            Self::Empty => Err(no_stream()),
            Self::Raw(s) => Ok(s.read_message().await?),
            Self::Tls(s) => Ok(s.read_message().await?),
            Self::Tunneled(s) => Ok(s.read_message().await?),
        }
    }

    /// Read one message and require it to be of `expected` type.
    pub async fn read_message_of(&mut self, expected: PacketType) -> Result<Message> {
        match self {
            Self::Empty => Err(no_stream()),
            Self::Raw(s) => Ok(s.read_message_of(expected).await?),
            Self::Tls(s) => Ok(s.read_message_of(expected).await?),
            Self::Tunneled(s) => Ok(s.read_message_of(expected).await?),
        }
    }

    /// Outgoing packet size.
    #[must_use]
    pub fn packet_size(&self) -> Option<usize> {
        match self {
            Self::Empty => None,
            Self::Raw(s) => Some(s.packet_size()),
            Self::Tls(s) => Some(s.packet_size()),
            Self::Tunneled(s) => Some(s.packet_size()),
        }
    }

    /// Change the outgoing packet size.
    pub fn set_packet_size(&mut self, size: usize) {
        match self {
            Self::Empty => {}
            Self::Raw(s) => s.set_packet_size(size),
            Self::Tls(s) => s.set_packet_size(size),
            Self::Tunneled(s) => s.set_packet_size(size),
        }
    }

    /// Release the plain transport so TLS can be layered on it.
    pub fn into_transport(self) -> Result<BoxedTransport> {
        match self {
            Self::Raw(s) => Ok(s.into_inner()?),
            Self::Empty => Err(no_stream()),
            Self::Tls(_) | Self::Tunneled(_) => Err(Error::InvalidArgument(
                "the stream is already encrypted".into(),
            )),
        }
    }

    /// Remove login-only TLS and continue on the plain transport.
    ///
    /// One-way: a tunneled stream becomes raw again and the TLS session is
    /// discarded.
    pub fn drop_login_tls(self) -> Result<Self> {
        match self {
            Self::Tunneled(s) => {
                let packet_size = s.packet_size();
                let (wrapper, _session) = s.into_inner()?.into_inner();
                let mut raw = PacketStream::new(wrapper.into_inner());
                raw.set_packet_size(packet_size);
                tracing::debug!("login sent, TLS removed for the rest of the session");
                Ok(Self::Raw(raw))
            }
            other => Err(Error::InvalidArgument(format!(
                "login-only encryption needs a tunneled TLS stream, found {other:?}"
            ))),
        }
    }
}

impl fmt::Debug for StreamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "Empty",
            Self::Raw(_) => "Raw",
            Self::Tls(_) => "Tls",
            Self::Tunneled(_) => "Tunneled",
        })
    }
}

fn no_stream() -> Error {
    Error::InvalidArgument("no connection stream is open".into())
}
