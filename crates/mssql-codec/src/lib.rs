//! # mssql-codec
//!
//! Async framing for TDS packets.
//!
//! Raw bytes are cut into packets by [`TdsCodec`], packets are joined into
//! messages by [`MessageAssembler`], and [`PacketStream`] offers both as
//! `send_message` / `read_message` over any `AsyncRead + AsyncWrite`
//! transport:
//!
//! ```text
//! transport → TdsCodec (packets) → MessageAssembler (messages) → handshake
//! ```
//!
//! The connection handshake swaps transports underneath the framing (plain
//! socket, TLS tunneled in PRELOGIN packets, TLS directly on the socket), so
//! `PacketStream` can release its transport once nothing is left buffered.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use error::CodecError;
pub use framed::PacketStream;
pub use message::{Message, MessageAssembler};
pub use packet_codec::{INITIAL_PACKET_SIZE, Packet, TdsCodec, split_message};
