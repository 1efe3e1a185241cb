//! LOGIN7 record construction.
//!
//! The record is a 94-byte fixed header followed by variable-length data.
//! Each variable field is addressed by an `(offset, length)` pair in the
//! header, with offsets measured from the start of the record and lengths in
//! UTF-16 code units. Feature extensions are appended after every other
//! field and located through a 4-byte pointer stored in the slot the header
//! calls `ibExtension`.
//!
//! Credentials never leave this module in the clear: passwords are
//! obfuscated (nibble swap then XOR `0xA5`) and every secret held by
//! [`Login7Auth`] is zeroed when the record is dropped.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use zeroize::Zeroize;

use crate::codec::{read_utf16, utf16_len, write_utf16};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed LOGIN7 header.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Client interface name reported to the server.
pub const CLIENT_INTERFACE_NAME: &str = "mssql-rs";

/// Largest SSPI blob addressable through the 16-bit length field.
const SSPI_SHORT_MAX: usize = u16::MAX as usize;

bitflags! {
    /// OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on database change.
        const USE_DB = 0x20;
        /// Failure to switch to the initial database is fatal.
        const INIT_DB_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG = 0x80;
    }
}

bitflags! {
    /// OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Failure to set the initial language is fatal.
        const INIT_LANG_FATAL = 0x01;
        /// Client is an ODBC driver.
        const ODBC = 0x02;
        /// Integrated security (SSPI) is in use.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// OLE DB client.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Request a password change.
        const CHANGE_PASSWORD = 0x01;
        /// Request a user instance.
        const USER_INSTANCE = 0x02;
        /// Accept unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// A feature extension block is present.
        const EXTENSION = 0x10;
    }
}

/// Feature extension identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeatureId {
    /// Connection resiliency.
    SessionRecovery = 0x01,
    /// Federated authentication.
    FedAuth = 0x02,
    /// Always Encrypted.
    ColumnEncryption = 0x04,
    /// Global transactions.
    GlobalTransactions = 0x05,
    /// Data classification.
    DataClassification = 0x09,
    /// UTF-8 collations.
    Utf8Support = 0x0A,
    /// DNS caching.
    DnsCaching = 0x0B,
    /// End of the feature block.
    Terminator = 0xFF,
}

impl FeatureId {
    /// Map a feature id byte, `None` for ids this crate does not know.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::SessionRecovery,
            0x02 => Self::FedAuth,
            0x04 => Self::ColumnEncryption,
            0x05 => Self::GlobalTransactions,
            0x09 => Self::DataClassification,
            0x0A => Self::Utf8Support,
            0x0B => Self::DnsCaching,
            0xFF => Self::Terminator,
            _ => return None,
        })
    }
}

bitflags! {
    /// Feature extensions requested in a LOGIN7 record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestedFeatures: u8 {
        /// Session recovery.
        const SESSION_RECOVERY = 0x01;
        /// Federated authentication.
        const FED_AUTH = 0x02;
        /// Global transactions.
        const GLOBAL_TRANSACTIONS = 0x04;
        /// Data classification.
        const DATA_CLASSIFICATION = 0x08;
        /// Column encryption.
        const COLUMN_ENCRYPTION = 0x10;
        /// UTF-8 support.
        const UTF8_SUPPORT = 0x20;
        /// DNS caching.
        const DNS_CACHING = 0x40;
    }
}

/// Highest column encryption protocol version this client speaks.
pub const COLUMN_ENCRYPTION_VERSION: u8 = 0x03;

/// Highest data classification version this client speaks.
pub const DATA_CLASSIFICATION_VERSION: u8 = 0x02;

/// MSAL workflow advertised with the federated authentication feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsalWorkflow {
    /// User name and password, or service principal secret.
    Password = 0x01,
    /// Integrated Windows authentication.
    Integrated = 0x02,
    /// Interactive, device code, managed identity and other token flows.
    Interactive = 0x03,
}

/// Federated authentication library selected in the feature payload.
#[derive(Clone, PartialEq, Eq)]
pub enum FedAuthLibrary {
    /// A pre-acquired access token sent inline.
    SecurityToken(Vec<u8>),
    /// The server describes its requirements and the client acquires a
    /// token in a follow-up FEDAUTHTOKEN message.
    Msal(MsalWorkflow),
}

impl FedAuthLibrary {
    const SECURITY_TOKEN_ID: u8 = 0x01;
    const MSAL_ID: u8 = 0x02;
}

impl core::fmt::Debug for FedAuthLibrary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SecurityToken(token) => f
                .debug_struct("SecurityToken")
                .field("len", &token.len())
                .finish(),
            Self::Msal(workflow) => f.debug_tuple("Msal").field(workflow).finish(),
        }
    }
}

/// Payload of the federated authentication feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FedAuthFeature {
    /// Library and its data.
    pub library: FedAuthLibrary,
    /// Echo of the server's FEDAUTHREQUIRED PRELOGIN answer.
    pub fed_auth_required_echo: bool,
}

impl FedAuthFeature {
    fn encode(&self, dst: &mut impl BufMut) {
        let echo = u8::from(self.fed_auth_required_echo);
        match &self.library {
            FedAuthLibrary::SecurityToken(token) => {
                dst.put_u8(FeatureId::FedAuth as u8);
                dst.put_u32_le((1 + 4 + token.len()) as u32);
                dst.put_u8((FedAuthLibrary::SECURITY_TOKEN_ID << 1) | echo);
                dst.put_u32_le(token.len() as u32);
                dst.put_slice(token);
            }
            FedAuthLibrary::Msal(workflow) => {
                dst.put_u8(FeatureId::FedAuth as u8);
                dst.put_u32_le(2);
                dst.put_u8((FedAuthLibrary::MSAL_ID << 1) | echo);
                dst.put_u8(*workflow as u8);
            }
        }
    }
}

/// How the LOGIN7 record authenticates.
///
/// SSPI and federated authentication are mutually exclusive with each
/// other and with SQL credentials; only the SQL variant puts a user name and
/// password into the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Login7Auth {
    /// SQL Server authentication.
    Sql {
        /// Login name.
        username: String,
        /// Password, obfuscated on the wire.
        password: String,
    },
    /// Integrated authentication with the first SSPI blob.
    Sspi(Vec<u8>),
    /// Federated authentication through the feature extension.
    Federated(FedAuthFeature),
}

impl Drop for Login7Auth {
    fn drop(&mut self) {
        match self {
            Self::Sql { password, .. } => password.zeroize(),
            Self::Sspi(blob) => blob.zeroize(),
            Self::Federated(feature) => {
                if let FedAuthLibrary::SecurityToken(token) = &mut feature.library {
                    token.zeroize();
                }
            }
        }
    }
}

/// A LOGIN7 record ready to be encoded.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// Requested protocol version.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// OptionFlags1.
    pub option_flags1: OptionFlags1,
    /// OptionFlags2.
    pub option_flags2: OptionFlags2,
    /// TypeFlags.
    pub type_flags: TypeFlags,
    /// OptionFlags3.
    pub option_flags3: OptionFlags3,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// Authentication data.
    pub auth: Login7Auth,
    /// Application name.
    pub app_name: String,
    /// Server name as the user typed it.
    pub server_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Database file to attach.
    pub attach_db_file: String,
    /// Replacement password for the password change flow.
    pub new_password: Option<String>,
    /// Requested feature extensions.
    pub features: RequestedFeatures,
    /// Reconnect data for session recovery; empty on a first login.
    pub session_recovery_data: Bytes,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: crate::packet::DEFAULT_PACKET_SIZE as u32,
            client_prog_version: 0,
            client_pid: std::process::id(),
            option_flags1: OptionFlags1::USE_DB | OptionFlags1::INIT_DB_FATAL | OptionFlags1::SET_LANG,
            option_flags2: OptionFlags2::INIT_LANG_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_lcid: 0x0409,
            hostname: String::new(),
            auth: Login7Auth::Sql {
                username: String::new(),
                password: String::new(),
            },
            app_name: String::new(),
            server_name: String::new(),
            language: String::new(),
            database: String::new(),
            attach_db_file: String::new(),
            new_password: None,
            features: RequestedFeatures::empty(),
            session_recovery_data: Bytes::new(),
        }
    }
}

impl Drop for Login7 {
    fn drop(&mut self) {
        if let Some(password) = self.new_password.as_mut() {
            password.zeroize();
        }
    }
}

struct FieldWriter {
    data: BytesMut,
    offsets: Vec<(u16, u16)>,
}

impl FieldWriter {
    fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(256),
            offsets: Vec::with_capacity(12),
        }
    }

    fn position(&self, field: &'static str) -> Result<u16, ProtocolError> {
        u16::try_from(LOGIN7_HEADER_SIZE + self.data.len()).map_err(|_| {
            ProtocolError::FieldTooLong {
                field,
                len: self.data.len(),
            }
        })
    }

    fn text(&mut self, field: &'static str, value: &str) -> Result<(), ProtocolError> {
        let offset = self.position(field)?;
        let len = utf16_len(value);
        let cch = u16::try_from(len).map_err(|_| ProtocolError::FieldTooLong { field, len })?;
        write_utf16(&mut self.data, value);
        self.offsets.push((offset, cch));
        Ok(())
    }

    fn password(&mut self, field: &'static str, value: &str) -> Result<(), ProtocolError> {
        let offset = self.position(field)?;
        let len = utf16_len(value);
        let cch = u16::try_from(len).map_err(|_| ProtocolError::FieldTooLong { field, len })?;
        write_obfuscated_password(&mut self.data, value);
        self.offsets.push((offset, cch));
        Ok(())
    }
}

impl Login7 {
    /// A record with driver defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Authenticate with SQL credentials.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Login7Auth::Sql {
            username: username.into(),
            password: password.into(),
        };
        self.option_flags2.remove(OptionFlags2::INTEGRATED_SECURITY);
        self
    }

    /// Authenticate with an SSPI blob.
    #[must_use]
    pub fn with_sspi(mut self, blob: Vec<u8>) -> Self {
        self.auth = Login7Auth::Sspi(blob);
        self.option_flags2.insert(OptionFlags2::INTEGRATED_SECURITY);
        self.features.remove(RequestedFeatures::FED_AUTH);
        self
    }

    /// Authenticate through the federated authentication feature.
    #[must_use]
    pub fn with_fed_auth(mut self, feature: FedAuthFeature) -> Self {
        self.auth = Login7Auth::Federated(feature);
        self.option_flags2.remove(OptionFlags2::INTEGRATED_SECURITY);
        self.features.insert(RequestedFeatures::FED_AUTH);
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the database file to attach.
    #[must_use]
    pub fn with_attach_db_file(mut self, path: impl Into<String>) -> Self {
        self.attach_db_file = path.into();
        self
    }

    /// Request a password change.
    #[must_use]
    pub fn with_new_password(mut self, password: impl Into<String>) -> Self {
        self.new_password = Some(password.into());
        self.option_flags3.insert(OptionFlags3::CHANGE_PASSWORD);
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Declare read-only application intent.
    #[must_use]
    pub fn with_read_only_intent(mut self, read_only: bool) -> Self {
        self.type_flags.set(TypeFlags::READ_ONLY_INTENT, read_only);
        self
    }

    /// Request a user instance.
    #[must_use]
    pub fn with_user_instance(mut self, enabled: bool) -> Self {
        self.option_flags3.set(OptionFlags3::USER_INSTANCE, enabled);
        self
    }

    /// Add feature extensions to the request.
    #[must_use]
    pub fn with_features(mut self, features: RequestedFeatures) -> Self {
        self.features |= features;
        self
    }

    /// Whether the record omits the user name and password.
    #[must_use]
    pub fn omits_credentials(&self) -> bool {
        !matches!(self.auth, Login7Auth::Sql { .. })
    }

    /// Encode the record.
    ///
    /// The returned buffer holds obfuscated secrets; callers zero it once
    /// it has been written.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut fields = FieldWriter::new();
        let (username, password) = match &self.auth {
            Login7Auth::Sql { username, password } => (username.as_str(), password.as_str()),
            Login7Auth::Sspi(_) | Login7Auth::Federated(_) => ("", ""),
        };

        fields.text("hostname", &self.hostname)?;
        fields.text("username", username)?;
        fields.password("password", password)?;
        fields.text("app_name", &self.app_name)?;
        fields.text("server_name", &self.server_name)?;

        // ibExtension points at a DWORD holding the feature block offset.
        let has_extension = !self.features.is_empty();
        let extension_slot = if has_extension {
            let offset = fields.position("extension")?;
            fields.data.put_u32_le(0);
            fields.offsets.push((offset, 4));
            Some(offset as usize - LOGIN7_HEADER_SIZE)
        } else {
            let offset = fields.position("extension")?;
            fields.offsets.push((offset, 0));
            None
        };

        fields.text("client_interface", CLIENT_INTERFACE_NAME)?;
        fields.text("language", &self.language)?;
        fields.text("database", &self.database)?;

        let sspi: &[u8] = match &self.auth {
            Login7Auth::Sspi(blob) => blob,
            _ => &[],
        };
        let sspi_offset = fields.position("sspi")?;
        fields.data.put_slice(sspi);

        fields.text("attach_db_file", &self.attach_db_file)?;
        fields.password("new_password", self.new_password.as_deref().unwrap_or(""))?;

        if let Some(slot) = extension_slot {
            let feature_offset = (LOGIN7_HEADER_SIZE + fields.data.len()) as u32;
            fields.data[slot..slot + 4].copy_from_slice(&feature_offset.to_le_bytes());
            self.encode_features(&mut fields.data);
        }

        let mut option_flags3 = self.option_flags3;
        option_flags3.set(OptionFlags3::EXTENSION, has_extension);

        let total = LOGIN7_HEADER_SIZE + fields.data.len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(0);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(option_flags3.bits());
        buf.put_i32_le(0);
        buf.put_u32_le(self.client_lcid);

        let offsets = &fields.offsets;
        // hostname .. client interface, language, database
        for &(offset, len) in &offsets[..9] {
            buf.put_u16_le(offset);
            buf.put_u16_le(len);
        }
        buf.put_slice(&[0u8; 6]);
        buf.put_u16_le(sspi_offset);
        if sspi.len() > SSPI_SHORT_MAX {
            buf.put_u16_le(u16::MAX);
        } else {
            buf.put_u16_le(sspi.len() as u16);
        }
        for &(offset, len) in &offsets[9..11] {
            buf.put_u16_le(offset);
            buf.put_u16_le(len);
        }
        buf.put_u32_le(if sspi.len() > SSPI_SHORT_MAX {
            sspi.len() as u32
        } else {
            0
        });

        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);
        buf.put_slice(&fields.data);
        fields.data.as_mut().zeroize();
        Ok(buf)
    }

    fn encode_features(&self, dst: &mut BytesMut) {
        if self.features.contains(RequestedFeatures::SESSION_RECOVERY) {
            dst.put_u8(FeatureId::SessionRecovery as u8);
            dst.put_u32_le(self.session_recovery_data.len() as u32);
            dst.put_slice(&self.session_recovery_data);
        }
        if self.features.contains(RequestedFeatures::FED_AUTH) {
            if let Login7Auth::Federated(feature) = &self.auth {
                feature.encode(dst);
            }
        }
        if self.features.contains(RequestedFeatures::COLUMN_ENCRYPTION) {
            put_versioned_feature(dst, FeatureId::ColumnEncryption, Some(COLUMN_ENCRYPTION_VERSION));
        }
        if self.features.contains(RequestedFeatures::GLOBAL_TRANSACTIONS) {
            put_versioned_feature(dst, FeatureId::GlobalTransactions, None);
        }
        if self.features.contains(RequestedFeatures::DATA_CLASSIFICATION) {
            put_versioned_feature(dst, FeatureId::DataClassification, Some(DATA_CLASSIFICATION_VERSION));
        }
        if self.features.contains(RequestedFeatures::UTF8_SUPPORT) {
            put_versioned_feature(dst, FeatureId::Utf8Support, None);
        }
        if self.features.contains(RequestedFeatures::DNS_CACHING) {
            put_versioned_feature(dst, FeatureId::DnsCaching, None);
        }
        dst.put_u8(FeatureId::Terminator as u8);
    }

    /// Decode a LOGIN7 record as a server would.
    pub fn decode(src: &[u8]) -> Result<ParsedLogin7, ProtocolError> {
        if src.len() < LOGIN7_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: LOGIN7_HEADER_SIZE,
                actual: src.len(),
            });
        }
        let mut header = &src[..LOGIN7_HEADER_SIZE];
        let _length = header.get_u32_le();
        let tds_version = TdsVersion::new(header.get_u32_le());
        let packet_size = header.get_u32_le();
        header.advance(12);
        let option_flags1 = OptionFlags1::from_bits_retain(header.get_u8());
        let option_flags2 = OptionFlags2::from_bits_retain(header.get_u8());
        let type_flags = TypeFlags::from_bits_retain(header.get_u8());
        let option_flags3 = OptionFlags3::from_bits_retain(header.get_u8());
        header.advance(8);

        let mut pairs = [(0u16, 0u16); 9];
        for pair in &mut pairs {
            *pair = (header.get_u16_le(), header.get_u16_le());
        }
        header.advance(6);
        let sspi = (header.get_u16_le(), header.get_u16_le());
        let attach = (header.get_u16_le(), header.get_u16_le());
        let change = (header.get_u16_le(), header.get_u16_le());
        let sspi_long = header.get_u32_le();

        let text = |(offset, cch): (u16, u16)| -> Result<String, ProtocolError> {
            let start = offset as usize;
            let mut field = src
                .get(start..start + cch as usize * 2)
                .ok_or(ProtocolError::UnexpectedEof)?;
            read_utf16(&mut field, cch as usize)
        };
        let password = |(offset, cch): (u16, u16)| -> Result<String, ProtocolError> {
            let start = offset as usize;
            let raw = src
                .get(start..start + cch as usize * 2)
                .ok_or(ProtocolError::UnexpectedEof)?;
            let plain: Vec<u8> = raw.iter().map(|b| (b ^ 0xA5).rotate_left(4)).collect();
            read_utf16(&mut &plain[..], cch as usize)
        };

        let sspi_len = if sspi.1 == u16::MAX && sspi_long > 0 {
            sspi_long as usize
        } else {
            sspi.1 as usize
        };
        let sspi_start = sspi.0 as usize;
        let sspi_data = src
            .get(sspi_start..sspi_start + sspi_len)
            .ok_or(ProtocolError::UnexpectedEof)?
            .to_vec();

        let mut features = Vec::new();
        if option_flags3.contains(OptionFlags3::EXTENSION) {
            let slot = pairs[5].0 as usize;
            let mut pointer = src.get(slot..slot + 4).ok_or(ProtocolError::UnexpectedEof)?;
            let start = pointer.get_u32_le() as usize;
            let mut block = src.get(start..).ok_or(ProtocolError::UnexpectedEof)?;
            loop {
                if !block.has_remaining() {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let id = block.get_u8();
                if id == FeatureId::Terminator as u8 {
                    break;
                }
                if block.remaining() < 4 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let len = block.get_u32_le() as usize;
                if block.remaining() < len {
                    return Err(ProtocolError::UnexpectedEof);
                }
                features.push((id, Bytes::copy_from_slice(&block[..len])));
                block.advance(len);
            }
        }

        Ok(ParsedLogin7 {
            tds_version,
            packet_size,
            option_flags1,
            option_flags2,
            type_flags,
            option_flags3,
            hostname: text(pairs[0])?,
            username: text(pairs[1])?,
            password: password(pairs[2])?,
            app_name: text(pairs[3])?,
            server_name: text(pairs[4])?,
            client_interface: text(pairs[6])?,
            language: text(pairs[7])?,
            database: text(pairs[8])?,
            sspi: sspi_data,
            attach_db_file: text(attach)?,
            new_password: password(change)?,
            features,
        })
    }
}

/// A LOGIN7 record as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogin7 {
    /// Requested protocol version.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// OptionFlags1.
    pub option_flags1: OptionFlags1,
    /// OptionFlags2.
    pub option_flags2: OptionFlags2,
    /// TypeFlags.
    pub type_flags: TypeFlags,
    /// OptionFlags3.
    pub option_flags3: OptionFlags3,
    /// Client machine name.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// De-obfuscated password.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name.
    pub server_name: String,
    /// Client interface name.
    pub client_interface: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// SSPI blob.
    pub sspi: Vec<u8>,
    /// Database file to attach.
    pub attach_db_file: String,
    /// De-obfuscated replacement password.
    pub new_password: String,
    /// Feature extensions as `(id, data)` in wire order.
    pub features: Vec<(u8, Bytes)>,
}

impl ParsedLogin7 {
    /// Data of the first feature with `id`.
    #[must_use]
    pub fn feature(&self, id: FeatureId) -> Option<&Bytes> {
        self.features
            .iter()
            .find(|(raw, _)| *raw == id as u8)
            .map(|(_, data)| data)
    }
}

fn put_versioned_feature(dst: &mut impl BufMut, id: FeatureId, version: Option<u8>) {
    dst.put_u8(id as u8);
    match version {
        Some(version) => {
            dst.put_u32_le(1);
            dst.put_u8(version);
        }
        None => dst.put_u32_le(0),
    }
}

/// Obfuscate a password: swap the nibbles of every byte, then XOR `0xA5`.
fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        let [low, high] = unit.to_le_bytes();
        dst.put_u8(low.rotate_right(4) ^ 0xA5);
        dst.put_u8(high.rotate_right(4) ^ 0xA5);
    }
}
