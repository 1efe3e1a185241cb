//! Protocol and product version types.

use core::fmt;

/// TDS protocol version carried in LOGIN7 and LOGINACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.1 (SQL Server 2000).
    pub const V7_1: Self = Self(0x7100_0000);
    /// TDS 7.2 (SQL Server 2005).
    pub const V7_2: Self = Self(0x7209_0002);
    /// TDS 7.3A (SQL Server 2008).
    pub const V7_3A: Self = Self(0x730A_0003);
    /// TDS 7.3B (SQL Server 2008 R2).
    pub const V7_3B: Self = Self(0x730B_0003);
    /// TDS 7.4 (SQL Server 2012 and later).
    pub const V7_4: Self = Self(0x7400_0004);
    /// TDS 8.0, the TLS-first protocol.
    pub const V8_0: Self = Self(0x0800_0000);

    /// Wrap a raw wire value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the TLS-first protocol.
    #[must_use]
    pub const fn is_tds_8(self) -> bool {
        self.0 == Self::V8_0.0
    }

    /// Whether encryption is negotiated inside PRELOGIN for this version.
    #[must_use]
    pub const fn requires_prelogin_encryption_negotiation(self) -> bool {
        !self.is_tds_8()
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V8_0 => f.write_str("TDS 8.0"),
            Self::V7_4 => f.write_str("TDS 7.4"),
            Self::V7_3B => f.write_str("TDS 7.3B"),
            Self::V7_3A => f.write_str("TDS 7.3A"),
            Self::V7_2 => f.write_str("TDS 7.2"),
            Self::V7_1 => f.write_str("TDS 7.1"),
            Self(raw) => write!(f, "TDS 0x{raw:08X}"),
        }
    }
}

/// Product version exchanged in the PRELOGIN VERSION option.
///
/// Layout on the wire is `major, minor, build (u16 BE), sub-build (u16 LE)`.
/// The client sends its driver version; the server answers with its SQL
/// Server product version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerVersion {
    /// Major version (9 = SQL Server 2005, 16 = SQL Server 2022).
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number.
    pub sub_build: u16,
}

impl ServerVersion {
    /// Length of the encoded value.
    pub const ENCODED_LEN: usize = 6;

    /// Create a version value.
    #[must_use]
    pub const fn new(major: u8, minor: u8, build: u16, sub_build: u16) -> Self {
        Self {
            major,
            minor,
            build,
            sub_build,
        }
    }

    /// Decode from the 6-byte PRELOGIN representation.
    #[must_use]
    pub fn from_bytes(raw: &[u8; 6]) -> Self {
        Self {
            major: raw[0],
            minor: raw[1],
            build: u16::from_be_bytes([raw[2], raw[3]]),
            sub_build: u16::from_le_bytes([raw[4], raw[5]]),
        }
    }

    /// Encode to the 6-byte PRELOGIN representation.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 6] {
        let build = self.build.to_be_bytes();
        let sub = self.sub_build.to_le_bytes();
        [self.major, self.minor, build[0], build[1], sub[0], sub[1]]
    }

    /// SQL Server 2005 (major 9) is the first release supporting MARS.
    #[must_use]
    pub const fn supports_mars(self) -> bool {
        self.major >= 9
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.sub_build
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tds_8_detection() {
        assert!(TdsVersion::V8_0.is_tds_8());
        assert!(!TdsVersion::V7_4.is_tds_8());
        assert!(TdsVersion::V7_4.requires_prelogin_encryption_negotiation());
        assert!(!TdsVersion::V8_0.requires_prelogin_encryption_negotiation());
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V7_4.to_string(), "TDS 7.4");
        assert_eq!(TdsVersion::V8_0.to_string(), "TDS 8.0");
        assert_eq!(TdsVersion::new(0x1234_5678).to_string(), "TDS 0x12345678");
    }

    #[test]
    fn test_server_version_byte_order() {
        let version = ServerVersion::new(16, 0, 4095, 3);
        let raw = version.to_bytes();
        assert_eq!(raw, [16, 0, 0x0F, 0xFF, 0x03, 0x00]);
        assert_eq!(ServerVersion::from_bytes(&raw), version);
        assert_eq!(version.to_string(), "16.0.4095.3");
    }

    #[test]
    fn test_server_version_mars_threshold() {
        assert!(!ServerVersion::new(8, 0, 2039, 0).supports_mars());
        assert!(ServerVersion::new(9, 0, 1399, 0).supports_mars());
    }
}
