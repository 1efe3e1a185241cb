//! TLS configuration.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::CertificateDer;

/// ALPN token advertised in TLS-first (TDS 8.0) mode.
pub const TDS8_ALPN: &[u8] = b"tds/8.0";

/// TLS settings for one connection attempt.
#[derive(Clone, Default)]
pub struct TlsConfig {
    /// Skip server certificate validation. Ignored in strict mode.
    pub trust_server_certificate: bool,

    /// TLS runs before any TDS traffic and advertises [`TDS8_ALPN`].
    pub strict_mode: bool,

    /// Host name to match in the server certificate instead of the
    /// connection target.
    pub host_name_in_certificate: Option<String>,

    /// Trust anchors. Empty means the Mozilla root store.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Lowest protocol version offered.
    pub min_protocol_version: TlsVersion,

    /// Caller-supplied certificate check, used instead of the root store.
    pub certificate_verifier: Option<Arc<dyn ServerCertVerifier>>,
}

impl TlsConfig {
    /// Default settings: validate against the Mozilla roots, TLS 1.2 or later.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip certificate validation outside strict mode.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Enable TLS-first mode.
    #[must_use]
    pub fn strict_mode(mut self, enabled: bool) -> Self {
        self.strict_mode = enabled;
        self
    }

    /// Override the certificate host name.
    #[must_use]
    pub fn with_host_name_in_certificate(mut self, name: impl Into<String>) -> Self {
        self.host_name_in_certificate = Some(name.into());
        self
    }

    /// Trust an additional root certificate.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Set the lowest protocol version.
    #[must_use]
    pub fn min_protocol_version(mut self, version: TlsVersion) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Delegate certificate validation to `verifier`.
    #[must_use]
    pub fn with_certificate_verifier(mut self, verifier: Arc<dyn ServerCertVerifier>) -> Self {
        self.certificate_verifier = Some(verifier);
        self
    }

    /// Whether the server certificate is checked.
    ///
    /// Strict mode always validates; otherwise validation is on unless the
    /// caller trusts the server certificate.
    #[must_use]
    pub fn validates_certificate(&self) -> bool {
        self.strict_mode || !self.trust_server_certificate
    }

    /// Host name the certificate must match.
    #[must_use]
    pub fn certificate_host<'a>(&'a self, server_name: &'a str) -> &'a str {
        self.host_name_in_certificate
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(server_name)
    }

    /// ALPN protocols to advertise.
    #[must_use]
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        if self.strict_mode {
            vec![TDS8_ALPN.to_vec()]
        } else {
            Vec::new()
        }
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("strict_mode", &self.strict_mode)
            .field("host_name_in_certificate", &self.host_name_in_certificate)
            .field("root_certificates", &self.root_certificates.len())
            .field("min_protocol_version", &self.min_protocol_version)
            .field("custom_verifier", &self.certificate_verifier.is_some())
            .finish()
    }
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    pub(crate) fn supported_from(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            Self::Tls12 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            Self::Tls13 => vec![&rustls::version::TLS13],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_forces_validation() {
        let config = TlsConfig::new().trust_server_certificate(true).strict_mode(true);
        assert!(config.validates_certificate());

        let config = TlsConfig::new().trust_server_certificate(true);
        assert!(!config.validates_certificate());
        assert!(TlsConfig::new().validates_certificate());
    }

    #[test]
    fn test_certificate_host_override() {
        let config = TlsConfig::new();
        assert_eq!(config.certificate_host("db.internal"), "db.internal");

        let config = config.with_host_name_in_certificate("*.database.windows.net");
        assert_eq!(
            config.certificate_host("db.internal"),
            "*.database.windows.net"
        );

        let config = TlsConfig::new().with_host_name_in_certificate("");
        assert_eq!(config.certificate_host("db.internal"), "db.internal");
    }

    #[test]
    fn test_alpn_only_in_strict_mode() {
        assert!(TlsConfig::new().alpn_protocols().is_empty());
        assert_eq!(
            TlsConfig::new().strict_mode(true).alpn_protocols(),
            vec![b"tds/8.0".to_vec()]
        );
    }

    #[test]
    fn test_protocol_versions() {
        assert_eq!(TlsVersion::Tls12.supported_from().len(), 2);
        assert_eq!(TlsVersion::Tls13.supported_from().len(), 1);
    }
}
