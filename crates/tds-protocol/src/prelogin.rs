//! PRELOGIN message encoding and decoding.
//!
//! The message is an option table followed by a data blob. Each table entry
//! is `id (u8), offset (u16 BE), length (u16 BE)` where the offset is
//! absolute from the start of the payload. The table ends with `0xFF`.
//!
//! Clients send options in a fixed order: VERSION, ENCRYPTION, INSTANCE,
//! THREADID, MARS, TRACEID, FEDAUTHREQUIRED. Servers answer with the same
//! structure and may include ids this crate does not know; those are skipped.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::version::ServerVersion;

/// Size of one option table entry.
const OPTION_ENTRY_SIZE: usize = 5;

/// INSTANCE response byte meaning the server is not the requested instance.
const ERROR_INST: u8 = 0x01;

/// PRELOGIN option identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Product version.
    Version = 0x00,
    /// Encryption capability.
    Encryption = 0x01,
    /// Instance name (request) or instance check result (response).
    Instance = 0x02,
    /// Client thread id.
    ThreadId = 0x03,
    /// MARS capability.
    Mars = 0x04,
    /// Connection and activity correlation ids.
    TraceId = 0x05,
    /// Federated authentication required.
    FedAuthRequired = 0x06,
    /// Server nonce for federated authentication.
    Nonce = 0x07,
    /// End of the option table.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Map an option id to a known option, `None` for ids to skip.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Version,
            0x01 => Self::Encryption,
            0x02 => Self::Instance,
            0x03 => Self::ThreadId,
            0x04 => Self::Mars,
            0x05 => Self::TraceId,
            0x06 => Self::FedAuthRequired,
            0x07 => Self::Nonce,
            0xFF => Self::Terminator,
            _ => return None,
        })
    }
}

/// Value of the ENCRYPTION option as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encryption available but not requested.
    Off = 0x00,
    /// Encryption requested.
    On = 0x01,
    /// Encryption not available.
    NotSupported = 0x02,
    /// Encryption required.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Decode the option byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x00 => Self::Off,
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            other => return Err(ProtocolError::InvalidEncryptionValue(other)),
        })
    }
}

/// The TRACEID option payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceId {
    /// Client connection id.
    pub connection_id: [u8; 16],
    /// Activity id.
    pub activity_id: [u8; 16],
    /// Activity sequence number (little-endian on the wire).
    pub activity_sequence: u32,
}

impl TraceId {
    /// Encoded length.
    pub const ENCODED_LEN: usize = 36;
}

/// A PRELOGIN message in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreLogin {
    /// Driver version (request) or SQL Server product version (response).
    pub version: ServerVersion,
    /// Encryption capability.
    pub encryption: EncryptionLevel,
    /// Instance name sent by the client; empty targets the default.
    pub instance: String,
    /// Set on responses whose INSTANCE byte is `ERROR_INST`.
    pub instance_mismatch: bool,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS requested or supported.
    pub mars: bool,
    /// Correlation ids.
    pub trace_id: Option<TraceId>,
    /// FEDAUTHREQUIRED value; `None` when the option is absent.
    pub fed_auth_required: Option<bool>,
    /// Server nonce.
    pub nonce: Option<[u8; 32]>,
}

impl Default for PreLogin {
    fn default() -> Self {
        Self::new()
    }
}

impl PreLogin {
    /// An empty request with encryption off and no optional fields.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: ServerVersion::default(),
            encryption: EncryptionLevel::Off,
            instance: String::new(),
            instance_mismatch: false,
            thread_id: None,
            mars: false,
            trace_id: None,
            fed_auth_required: None,
            nonce: None,
        }
    }

    /// Set the VERSION option.
    #[must_use]
    pub fn with_version(mut self, version: ServerVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the ENCRYPTION option.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Set the THREADID option.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Set the MARS option.
    #[must_use]
    pub fn with_mars(mut self, enabled: bool) -> Self {
        self.mars = enabled;
        self
    }

    /// Set the TRACEID option.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Set the FEDAUTHREQUIRED option.
    #[must_use]
    pub fn with_fed_auth_required(mut self, required: bool) -> Self {
        self.fed_auth_required = Some(required);
        self
    }

    /// Encode the message payload (without packet header).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(PreLoginOption, BytesMut)> = Vec::with_capacity(8);

        let mut version = BytesMut::with_capacity(ServerVersion::ENCODED_LEN);
        version.put_slice(&self.version.to_bytes());
        options.push((PreLoginOption::Version, version));

        let mut encryption = BytesMut::with_capacity(1);
        encryption.put_u8(self.encryption as u8);
        options.push((PreLoginOption::Encryption, encryption));

        let mut instance = BytesMut::with_capacity(self.instance.len() + 1);
        if self.instance_mismatch {
            instance.put_u8(ERROR_INST);
        } else {
            instance.put_slice(self.instance.as_bytes());
            instance.put_u8(0);
        }
        options.push((PreLoginOption::Instance, instance));

        if let Some(thread_id) = self.thread_id {
            let mut data = BytesMut::with_capacity(4);
            data.put_u32(thread_id);
            options.push((PreLoginOption::ThreadId, data));
        }

        let mut mars = BytesMut::with_capacity(1);
        mars.put_u8(u8::from(self.mars));
        options.push((PreLoginOption::Mars, mars));

        if let Some(trace) = &self.trace_id {
            let mut data = BytesMut::with_capacity(TraceId::ENCODED_LEN);
            data.put_slice(&trace.connection_id);
            data.put_slice(&trace.activity_id);
            data.put_u32_le(trace.activity_sequence);
            options.push((PreLoginOption::TraceId, data));
        }

        if let Some(required) = self.fed_auth_required {
            let mut data = BytesMut::with_capacity(1);
            data.put_u8(u8::from(required));
            options.push((PreLoginOption::FedAuthRequired, data));
        }

        if let Some(nonce) = &self.nonce {
            options.push((PreLoginOption::Nonce, BytesMut::from(&nonce[..])));
        }

        let table_size = options.len() * OPTION_ENTRY_SIZE + 1;
        let data_size: usize = options.iter().map(|(_, data)| data.len()).sum();
        let mut buf = BytesMut::with_capacity(table_size + data_size);

        let mut offset = table_size;
        for (option, data) in &options {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in options {
            buf.put_slice(&data);
        }

        buf.freeze()
    }

    /// Decode a PRELOGIN payload.
    ///
    /// Closed-enumeration fields (ENCRYPTION, MARS, FEDAUTHREQUIRED) reject
    /// out-of-range bytes instead of coercing them.
    pub fn decode(src: impl Buf) -> Result<Self, ProtocolError> {
        Self::decode_options(src, true)
    }

    /// Decode a response received after TLS-first.
    ///
    /// The stream is already encrypted, so the ENCRYPTION option is skipped
    /// without being read and `encryption` keeps its default.
    pub fn decode_tls_first(src: impl Buf) -> Result<Self, ProtocolError> {
        Self::decode_options(src, false)
    }

    fn decode_options(mut src: impl Buf, read_encryption: bool) -> Result<Self, ProtocolError> {
        let payload = src.copy_to_bytes(src.remaining());
        let mut table = &payload[..];
        let mut prelogin = Self::new();

        loop {
            if !table.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let id = table.get_u8();
            if id == PreLoginOption::Terminator as u8 {
                break;
            }
            if table.remaining() < OPTION_ENTRY_SIZE - 1 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let offset = table.get_u16();
            let length = table.get_u16();

            let Some(option) = PreLoginOption::from_u8(id) else {
                continue;
            };
            let start = offset as usize;
            let data = payload
                .get(start..start + length as usize)
                .ok_or(ProtocolError::PreLoginOptionOutOfBounds {
                    option: id,
                    offset,
                    length,
                })?;

            match option {
                PreLoginOption::Version => {
                    let raw: &[u8; 6] = data
                        .get(..ServerVersion::ENCODED_LEN)
                        .and_then(|v| v.try_into().ok())
                        .ok_or(ProtocolError::UnexpectedEof)?;
                    prelogin.version = ServerVersion::from_bytes(raw);
                }
                PreLoginOption::Encryption if read_encryption => {
                    prelogin.encryption = EncryptionLevel::from_u8(first_byte(data)?)?;
                }
                PreLoginOption::Encryption => {}
                PreLoginOption::Instance => {
                    if data == [ERROR_INST] {
                        prelogin.instance_mismatch = true;
                    } else {
                        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                        prelogin.instance = core::str::from_utf8(&data[..end])
                            .map_err(|e| ProtocolError::StringEncoding(e.to_string()))?
                            .to_string();
                    }
                }
                PreLoginOption::ThreadId => {
                    let mut raw = data;
                    if raw.remaining() >= 4 {
                        prelogin.thread_id = Some(raw.get_u32());
                    }
                }
                PreLoginOption::Mars => {
                    prelogin.mars = match first_byte(data)? {
                        0 => false,
                        1 => true,
                        other => return Err(ProtocolError::InvalidMarsValue(other)),
                    };
                }
                PreLoginOption::TraceId => {
                    let mut raw = data;
                    if raw.remaining() >= TraceId::ENCODED_LEN {
                        let mut trace = TraceId::default();
                        raw.copy_to_slice(&mut trace.connection_id);
                        raw.copy_to_slice(&mut trace.activity_id);
                        trace.activity_sequence = raw.get_u32_le();
                        prelogin.trace_id = Some(trace);
                    }
                }
                PreLoginOption::FedAuthRequired => {
                    prelogin.fed_auth_required = Some(match first_byte(data)? {
                        0 => false,
                        1 => true,
                        other => return Err(ProtocolError::InvalidFedAuthRequired(other)),
                    });
                }
                PreLoginOption::Nonce => {
                    if let Some(raw) = data.get(..32) {
                        let mut nonce = [0u8; 32];
                        nonce.copy_from_slice(raw);
                        prelogin.nonce = Some(nonce);
                    }
                }
                PreLoginOption::Terminator => break,
            }
        }

        Ok(prelogin)
    }
}

fn first_byte(data: &[u8]) -> Result<u8, ProtocolError> {
    data.first().copied().ok_or(ProtocolError::UnexpectedEof)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn client_request() -> PreLogin {
        PreLogin::new()
            .with_version(ServerVersion::new(0, 1, 0, 0))
            .with_encryption(EncryptionLevel::On)
            .with_thread_id(42)
            .with_mars(false)
            .with_trace_id(TraceId {
                connection_id: [0xAA; 16],
                activity_id: [0xBB; 16],
                activity_sequence: 7,
            })
            .with_fed_auth_required(true)
    }

    #[test]
    fn test_request_option_order_and_offsets() {
        let encoded = client_request().encode();
        // 7 options * 5 bytes + terminator
        let table_size = 36u16;
        let ids: Vec<u8> = (0..7).map(|i| encoded[i * 5]).collect();
        assert_eq!(ids, vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(encoded[35], 0xFF);

        // VERSION starts right after the table.
        assert_eq!(u16::from_be_bytes([encoded[1], encoded[2]]), table_size);
        assert_eq!(u16::from_be_bytes([encoded[3], encoded[4]]), 6);
        // ENCRYPTION follows the 6 version bytes.
        assert_eq!(u16::from_be_bytes([encoded[6], encoded[7]]), table_size + 6);
        assert_eq!(encoded[(table_size + 6) as usize], 0x01);
        // TRACEID is 36 bytes, FEDAUTHREQUIRED is 1.
        assert_eq!(u16::from_be_bytes([encoded[28], encoded[29]]), 36);
        assert_eq!(u16::from_be_bytes([encoded[33], encoded[34]]), 1);
        assert_eq!(encoded.len(), 36 + 6 + 1 + 1 + 4 + 1 + 36 + 1);
        assert_eq!(*encoded.last().unwrap(), 0x01);
    }

    #[test]
    fn test_request_roundtrip() {
        let original = client_request();
        let decoded = PreLogin::decode(original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_absolute_offsets_out_of_order() {
        let mut buf = BytesMut::new();
        let table_size: u16 = 11;
        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(table_size);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(table_size + 1);
        buf.put_u16(6);
        buf.put_u8(0xFF);
        buf.put_u8(0x03);
        buf.put_slice(&[15, 0, 0x07, 0xD0, 0x01, 0x00]);

        let decoded = PreLogin::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Required);
        assert_eq!(decoded.version, ServerVersion::new(15, 0, 2000, 1));
    }

    #[test]
    fn test_decode_skips_unknown_option() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x42);
        buf.put_u16(11);
        buf.put_u16(3);
        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(14);
        buf.put_u16(1);
        buf.put_u8(0xFF);
        buf.put_slice(&[9, 9, 9]);
        buf.put_u8(0x00);

        let decoded = PreLogin::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Off);
    }

    fn single_option(id: PreLoginOption, value: u8) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(id as u8);
        buf.put_u16(6);
        buf.put_u16(1);
        buf.put_u8(0xFF);
        buf.put_u8(value);
        buf.freeze()
    }

    #[test]
    fn test_fed_auth_required_out_of_range() {
        let err = PreLogin::decode(single_option(PreLoginOption::FedAuthRequired, 0x02)).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidFedAuthRequired(0x02));
        assert!(err.to_string().contains("0x02"));
    }

    #[test]
    fn test_fed_auth_required_values() {
        let off = PreLogin::decode(single_option(PreLoginOption::FedAuthRequired, 0)).unwrap();
        let on = PreLogin::decode(single_option(PreLoginOption::FedAuthRequired, 1)).unwrap();
        assert_eq!(off.fed_auth_required, Some(false));
        assert_eq!(on.fed_auth_required, Some(true));
    }

    #[test]
    fn test_mars_out_of_range() {
        let err = PreLogin::decode(single_option(PreLoginOption::Mars, 0x05)).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidMarsValue(0x05));
    }

    #[test]
    fn test_unknown_encryption_value() {
        let err = PreLogin::decode(single_option(PreLoginOption::Encryption, 0x80)).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidEncryptionValue(0x80));
    }

    #[test]
    fn test_tls_first_skips_encryption() {
        let decoded =
            PreLogin::decode_tls_first(single_option(PreLoginOption::Encryption, 0x80)).unwrap();
        assert_eq!(decoded.encryption, PreLogin::new().encryption);

        // Other closed enumerations are still checked.
        let err = PreLogin::decode_tls_first(single_option(PreLoginOption::Mars, 0x05)).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidMarsValue(0x05));
    }

    #[test]
    fn test_instance_mismatch_response() {
        let decoded = PreLogin::decode(single_option(PreLoginOption::Instance, ERROR_INST)).unwrap();
        assert!(decoded.instance_mismatch);

        let ok = PreLogin::decode(single_option(PreLoginOption::Instance, 0)).unwrap();
        assert!(!ok.instance_mismatch);
        assert!(ok.instance.is_empty());
    }

    #[test]
    fn test_offset_out_of_bounds() {
        let mut buf = BytesMut::new();
        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(200);
        buf.put_u16(1);
        buf.put_u8(0xFF);
        let err = PreLogin::decode(buf.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PreLoginOptionOutOfBounds { option: 0x01, offset: 200, .. }
        ));
    }

    #[test]
    fn test_missing_terminator() {
        let raw = [0x01u8, 0x00, 0x06];
        assert_eq!(PreLogin::decode(&raw[..]).unwrap_err(), ProtocolError::UnexpectedEof);
    }

    fn encryption_level() -> impl Strategy<Value = EncryptionLevel> {
        prop_oneof![
            Just(EncryptionLevel::Off),
            Just(EncryptionLevel::On),
            Just(EncryptionLevel::NotSupported),
            Just(EncryptionLevel::Required),
        ]
    }

    proptest! {
        #[test]
        fn prop_roundtrip_preserves_negotiated_fields(
            encryption in encryption_level(),
            mars in any::<bool>(),
            major in any::<u8>(),
            build in any::<u16>(),
            fed_auth in proptest::option::of(any::<bool>()),
        ) {
            let original = PreLogin::new()
                .with_version(ServerVersion::new(major, 0, build, 0))
                .with_encryption(encryption)
                .with_mars(mars);
            let original = match fed_auth {
                Some(value) => original.with_fed_auth_required(value),
                None => original,
            };
            let decoded = PreLogin::decode(original.encode()).unwrap();
            prop_assert_eq!(decoded, original);
        }

        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = PreLogin::decode(&data[..]);
        }
    }
}
