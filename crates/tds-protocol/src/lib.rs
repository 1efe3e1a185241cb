//! # tds-protocol
//!
//! Wire structures for establishing a TDS (Tabular Data Stream) session with
//! SQL Server: packet framing, the PRELOGIN option table, the LOGIN7 record
//! with its feature extensions, and the tokens a server sends back while a
//! login is in flight.
//!
//! The crate performs no I/O. Encoders produce `bytes` buffers and decoders
//! accept anything implementing [`bytes::Buf`], so the same types serve the
//! client pipeline, test servers and fuzzers.
//!
//! ```rust
//! use tds_protocol::{EncryptionLevel, PreLogin, ServerVersion};
//!
//! let request = PreLogin::new()
//!     .with_version(ServerVersion::new(0, 1, 0, 0))
//!     .with_encryption(EncryptionLevel::On);
//! let decoded = PreLogin::decode(request.encode()).unwrap();
//! assert_eq!(decoded.encryption, EncryptionLevel::On);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod token;
pub mod version;

pub use error::ProtocolError;
pub use login7::{
    FeatureId, FedAuthFeature, FedAuthLibrary, Login7, Login7Auth, MsalWorkflow, OptionFlags1,
    OptionFlags2, OptionFlags3, ParsedLogin7, RequestedFeatures, TypeFlags,
};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption, TraceId};
pub use token::{
    Done, DoneStatus, EnvChange, FeatureExtAck, FedAuthInfo, LoginAck, ServerMessage, Token,
    TokenParser, TokenType,
};
pub use version::{ServerVersion, TdsVersion};
