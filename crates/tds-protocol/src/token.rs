//! Tokens the server sends in reply to LOGIN7.
//!
//! Only the tokens that can appear before the session is ready are
//! modelled: LOGINACK, ENVCHANGE (including routing), ERROR, INFO, DONE,
//! FEATUREEXTACK, FEDAUTHINFO and SSPI. Encoders are provided alongside the
//! decoders so test servers can produce byte-exact replies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{read_b_varchar, read_us_varchar, read_utf16, utf16_len, write_b_varchar, write_utf16};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Token type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// ERROR.
    Error = 0xAA,
    /// INFO.
    Info = 0xAB,
    /// LOGINACK.
    LoginAck = 0xAD,
    /// FEATUREEXTACK.
    FeatureExtAck = 0xAE,
    /// ENVCHANGE.
    EnvChange = 0xE3,
    /// SSPI.
    Sspi = 0xED,
    /// FEDAUTHINFO.
    FedAuthInfo = 0xEE,
    /// DONE.
    Done = 0xFD,
}

impl TokenType {
    /// Map a token byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xE3 => Self::EnvChange,
            0xED => Self::Sspi,
            0xEE => Self::FedAuthInfo,
            0xFD => Self::Done,
            _ => return None,
        })
    }
}

/// A decoded login-response token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Server error.
    Error(ServerMessage),
    /// Informational message.
    Info(ServerMessage),
    /// Login accepted.
    LoginAck(LoginAck),
    /// Environment change.
    EnvChange(EnvChange),
    /// Feature acknowledgement.
    FeatureExtAck(FeatureExtAck),
    /// Federated authentication parameters.
    FedAuthInfo(FedAuthInfo),
    /// SSPI challenge.
    Sspi(Bytes),
    /// End of the response.
    Done(Done),
}

/// ERROR and INFO share one layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// State.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Reporting server.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerMessage {
    /// Decode the token body (after the type byte).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = length_prefixed_u16(src)?;
        if body.remaining() < 6 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let number = body.get_i32_le();
        let state = body.get_u8();
        let class = body.get_u8();
        let message = read_us_varchar(&mut body)?;
        let server = read_b_varchar(&mut body)?;
        let procedure = read_b_varchar(&mut body)?;
        if body.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let line = body.get_i32_le();
        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode as an ERROR or INFO token.
    pub fn encode(&self, token: TokenType, dst: &mut impl BufMut) {
        let mut body = BytesMut::new();
        body.put_i32_le(self.number);
        body.put_u8(self.state);
        body.put_u8(self.class);
        body.put_u16_le(utf16_len(&self.message) as u16);
        write_utf16(&mut body, &self.message);
        write_b_varchar(&mut body, &self.server);
        write_b_varchar(&mut body, &self.procedure);
        body.put_i32_le(self.line);

        dst.put_u8(token as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
    }
}

/// LOGINACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface (1 = T-SQL).
    pub interface: u8,
    /// Negotiated protocol version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version, big-endian major.minor.build.
    pub prog_version: u32,
}

impl LoginAck {
    /// Decode the token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = length_prefixed_u16(src)?;
        if body.remaining() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let interface = body.get_u8();
        let tds_version = TdsVersion::new(body.get_u32());
        let prog_name = read_b_varchar(&mut body)?;
        if body.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version: body.get_u32(),
        })
    }

    /// Encode with the type byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut body = BytesMut::new();
        body.put_u8(self.interface);
        body.put_u32(self.tds_version.raw());
        write_b_varchar(&mut body, &self.prog_name);
        body.put_u32(self.prog_version);

        dst.put_u8(TokenType::LoginAck as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
    }
}

/// ENVCHANGE kinds relevant to login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Language changed.
    Language(String),
    /// Packet size negotiated.
    PacketSize(u32),
    /// SQL collation (5 raw bytes).
    Collation(Bytes),
    /// Database mirroring partner of the current database.
    FailoverPartner(String),
    /// Reroute to another server.
    Routing {
        /// Target host.
        host: String,
        /// Target TCP port.
        port: u16,
    },
    /// Any other change, kept raw.
    Other {
        /// ENVCHANGE type byte.
        kind: u8,
        /// Body after the type byte.
        data: Bytes,
    },
}

impl EnvChange {
    const DATABASE: u8 = 1;
    const LANGUAGE: u8 = 2;
    const PACKET_SIZE: u8 = 4;
    const SQL_COLLATION: u8 = 7;
    const MIRRORING_PARTNER: u8 = 13;
    const ROUTING: u8 = 20;

    /// Routing protocol byte for TCP.
    const ROUTING_PROTOCOL_TCP: u8 = 0;

    /// Decode the token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = length_prefixed_u16(src)?;
        if !body.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let kind = body.get_u8();
        Ok(match kind {
            Self::DATABASE => Self::Database {
                new: read_b_varchar(&mut body)?,
                old: read_b_varchar(&mut body)?,
            },
            Self::LANGUAGE => Self::Language(read_b_varchar(&mut body)?),
            Self::PACKET_SIZE => {
                let raw = read_b_varchar(&mut body)?;
                let size = raw.parse().map_err(|_| ProtocolError::InvalidToken {
                    token: "ENVCHANGE",
                    reason: format!("packet size {raw:?} is not a number"),
                })?;
                Self::PacketSize(size)
            }
            Self::SQL_COLLATION => {
                if !body.has_remaining() {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let len = body.get_u8() as usize;
                if body.remaining() < len {
                    return Err(ProtocolError::UnexpectedEof);
                }
                Self::Collation(body.copy_to_bytes(len))
            }
            Self::MIRRORING_PARTNER => Self::FailoverPartner(read_b_varchar(&mut body)?),
            Self::ROUTING => Self::decode_routing(&mut body)?,
            other => Self::Other {
                kind: other,
                data: body.copy_to_bytes(body.remaining()),
            },
        })
    }

    fn decode_routing(body: &mut Bytes) -> Result<Self, ProtocolError> {
        if body.remaining() < 7 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let _value_len = body.get_u16_le();
        let protocol = body.get_u8();
        if protocol != Self::ROUTING_PROTOCOL_TCP {
            return Err(ProtocolError::InvalidToken {
                token: "ENVCHANGE",
                reason: format!("unsupported routing protocol {protocol}"),
            });
        }
        let port = body.get_u16_le();
        let host_len = body.get_u16_le() as usize;
        let host = read_utf16(body, host_len)?;
        Ok(Self::Routing { host, port })
    }

    /// Encode with the type byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut body = BytesMut::new();
        match self {
            Self::Database { new, old } => {
                body.put_u8(Self::DATABASE);
                write_b_varchar(&mut body, new);
                write_b_varchar(&mut body, old);
            }
            Self::Language(language) => {
                body.put_u8(Self::LANGUAGE);
                write_b_varchar(&mut body, language);
                body.put_u8(0);
            }
            Self::PacketSize(size) => {
                body.put_u8(Self::PACKET_SIZE);
                write_b_varchar(&mut body, &size.to_string());
                write_b_varchar(&mut body, &crate::packet::DEFAULT_PACKET_SIZE.to_string());
            }
            Self::Collation(raw) => {
                body.put_u8(Self::SQL_COLLATION);
                body.put_u8(raw.len() as u8);
                body.put_slice(raw);
                body.put_u8(0);
            }
            Self::FailoverPartner(partner) => {
                body.put_u8(Self::MIRRORING_PARTNER);
                write_b_varchar(&mut body, partner);
                body.put_u8(0);
            }
            Self::Routing { host, port } => {
                let host_units = utf16_len(host);
                body.put_u8(Self::ROUTING);
                body.put_u16_le((1 + 2 + 2 + host_units * 2) as u16);
                body.put_u8(Self::ROUTING_PROTOCOL_TCP);
                body.put_u16_le(*port);
                body.put_u16_le(host_units as u16);
                write_utf16(&mut body, host);
                body.put_u16_le(0);
            }
            Self::Other { kind, data } => {
                body.put_u8(*kind);
                body.put_slice(data);
            }
        }
        dst.put_u8(TokenType::EnvChange as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
    }
}

/// FEATUREEXTACK.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureExtAck {
    /// Acknowledged features as `(id, data)`.
    pub features: Vec<(u8, Bytes)>,
}

impl FeatureExtAck {
    /// Decode the token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut features = Vec::new();
        loop {
            if !src.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let id = src.get_u8();
            if id == crate::login7::FeatureId::Terminator as u8 {
                return Ok(Self { features });
            }
            if src.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let len = src.get_u32_le() as usize;
            if src.remaining() < len {
                return Err(ProtocolError::IncompletePacket {
                    expected: len,
                    actual: src.remaining(),
                });
            }
            features.push((id, src.copy_to_bytes(len)));
        }
    }

    /// Encode with the type byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::FeatureExtAck as u8);
        for (id, data) in &self.features {
            dst.put_u8(*id);
            dst.put_u32_le(data.len() as u32);
            dst.put_slice(data);
        }
        dst.put_u8(crate::login7::FeatureId::Terminator as u8);
    }

    /// Whether the server acknowledged `id`.
    #[must_use]
    pub fn acknowledges(&self, id: crate::login7::FeatureId) -> bool {
        self.features.iter().any(|(raw, _)| *raw == id as u8)
    }
}

/// FEDAUTHINFO.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FedAuthInfo {
    /// Token endpoint.
    pub sts_url: String,
    /// Service principal name.
    pub spn: String,
}

impl FedAuthInfo {
    const SPN: u8 = 0x01;
    const STS_URL: u8 = 0x02;

    /// Decode the token body.
    ///
    /// Option data offsets are relative to the start of the count field.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let len = src.get_u32_le() as usize;
        if src.remaining() < len || len < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let body = src.copy_to_bytes(len);
        let mut header = &body[..];
        let count = header.get_u32_le() as usize;

        let mut info = Self::default();
        for _ in 0..count {
            if header.remaining() < 9 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let id = header.get_u8();
            let data_len = header.get_u32_le() as usize;
            let offset = header.get_u32_le() as usize;
            let mut data = body
                .get(offset..offset + data_len)
                .ok_or(ProtocolError::UnexpectedEof)?;
            let value = read_utf16(&mut data, data_len / 2)?;
            match id {
                Self::SPN => info.spn = value,
                Self::STS_URL => info.sts_url = value,
                _ => {}
            }
        }
        Ok(info)
    }

    /// Encode with the type byte. Options are written SPN first, then
    /// the STS URL.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let spn_len = utf16_len(&self.spn) * 2;
        let sts_len = utf16_len(&self.sts_url) * 2;
        let data_start = 4 + 2 * 9;

        let mut body = BytesMut::new();
        body.put_u32_le(2);
        body.put_u8(Self::SPN);
        body.put_u32_le(spn_len as u32);
        body.put_u32_le(data_start as u32);
        body.put_u8(Self::STS_URL);
        body.put_u32_le(sts_len as u32);
        body.put_u32_le((data_start + spn_len) as u32);
        write_utf16(&mut body, &self.spn);
        write_utf16(&mut body, &self.sts_url);

        dst.put_u8(TokenType::FedAuthInfo as u8);
        dst.put_u32_le(body.len() as u32);
        dst.put_slice(&body);
    }
}

bitflags::bitflags! {
    /// DONE status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is open.
        const IN_XACT = 0x0004;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Attention acknowledgement.
        const ATTN = 0x0020;
        /// Server error terminated the statement.
        const SRVERROR = 0x0100;
    }
}

/// DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Current command.
    pub cur_cmd: u16,
    /// Row count.
    pub row_count: u64,
}

impl Done {
    /// Body size.
    pub const SIZE: usize = 12;

    /// A final DONE with no error.
    #[must_use]
    pub const fn final_ok() -> Self {
        Self {
            status: DoneStatus::empty(),
            cur_cmd: 0,
            row_count: 0,
        }
    }

    /// Decode the token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode with the type byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::Done as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// Whether the error bit is set.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR)
    }

    /// Whether more tokens follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }
}

fn length_prefixed_u16(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u16_le() as usize;
    if src.remaining() < len {
        return Err(ProtocolError::IncompletePacket {
            expected: len,
            actual: src.remaining(),
        });
    }
    Ok(src.copy_to_bytes(len))
}

/// Sequential reader over a login-response message.
pub struct TokenParser {
    data: Bytes,
}

impl TokenParser {
    /// Parse tokens out of a reassembled message payload.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// The next token, or `None` at the end of the message.
    pub fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        if !self.data.has_remaining() {
            return Ok(None);
        }
        let raw = self.data.get_u8();
        let kind = TokenType::from_u8(raw).ok_or(ProtocolError::InvalidTokenType(raw))?;
        let src = &mut self.data;
        let token = match kind {
            TokenType::Error => Token::Error(ServerMessage::decode(src)?),
            TokenType::Info => Token::Info(ServerMessage::decode(src)?),
            TokenType::LoginAck => Token::LoginAck(LoginAck::decode(src)?),
            TokenType::EnvChange => Token::EnvChange(EnvChange::decode(src)?),
            TokenType::FeatureExtAck => Token::FeatureExtAck(FeatureExtAck::decode(src)?),
            TokenType::FedAuthInfo => Token::FedAuthInfo(FedAuthInfo::decode(src)?),
            TokenType::Sspi => Token::Sspi(length_prefixed_u16(src)?),
            TokenType::Done => Token::Done(Done::decode(src)?),
        };
        Ok(Some(token))
    }
}

impl Iterator for TokenParser {
    type Item = Result<Token, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => None,
            Err(e) => {
                self.data.clear();
                Some(Err(e))
            }
        }
    }
}
