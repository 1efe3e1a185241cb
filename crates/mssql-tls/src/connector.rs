//! Client-side TLS handshakes.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::prelogin_wrapper::TlsPreloginWrapper;

/// Accepts any certificate. Used when the caller trusts the server
/// certificate outside strict mode.
#[derive(Debug)]
struct AcceptAnyServerCert {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Performs TLS handshakes for one connection attempt.
///
/// [`connect`](Self::connect) runs TLS directly over the transport (TLS-first);
/// [`connect_tunneled`](Self::connect_tunneled) carries the handshake inside
/// PRELOGIN packets and switches to raw TLS records once it completes.
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Build a connector from `config`.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = build_client_config(&config)?;
        Ok(Self {
            config,
            inner: TokioTlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Handshake directly over `stream`.
    pub async fn connect<S>(&self, stream: S, server_name: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = self.server_name(server_name)?;
        tracing::debug!(server_name = ?name, strict = self.config.strict_mode, "TLS handshake");

        let tls = self
            .inner
            .connect(name, stream)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        tracing::debug!(
            protocol = ?tls.get_ref().1.protocol_version(),
            "TLS handshake complete"
        );
        Ok(tls)
    }

    /// Handshake with TLS records tunneled in PRELOGIN packets.
    ///
    /// On return the wrapper has been switched to pass-through, so further
    /// traffic is plain TLS on the transport.
    pub async fn connect_tunneled<S>(
        &self,
        stream: S,
        server_name: &str,
    ) -> Result<TlsStream<TlsPreloginWrapper<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut tls = self.connect(TlsPreloginWrapper::new(stream), server_name).await?;
        tls.get_mut().0.handshake_complete();
        Ok(tls)
    }

    fn server_name(&self, server_name: &str) -> Result<ServerName<'static>, TlsError> {
        let host = self.config.certificate_host(server_name);
        ServerName::try_from(host.to_owned())
            .map_err(|_| TlsError::InvalidServerName(host.to_owned()))
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let versions = config.min_protocol_version.supported_from();
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&versions)?;

    let mut client_config = if let Some(verifier) = &config.certificate_verifier {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(verifier))
            .with_no_client_auth()
    } else if !config.validates_certificate() {
        tracing::warn!(
            "server certificate validation is disabled; the connection is open to \
             man-in-the-middle attacks"
        );
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert {
                schemes: supported_schemes(&provider),
            }))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store(config)?)
            .with_no_client_auth()
    };

    client_config.alpn_protocols = config.alpn_protocols();
    Ok(client_config)
}

fn supported_schemes(provider: &CryptoProvider) -> Vec<SignatureScheme> {
    provider
        .signature_verification_algorithms
        .supported_schemes()
}

fn root_store(config: &TlsConfig) -> Result<RootCertStore, TlsError> {
    if config.root_certificates.is_empty() {
        return Ok(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        });
    }

    let mut store = RootCertStore::empty();
    for cert in &config.root_certificates {
        store
            .add(cert.clone())
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    }
    Ok(store)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::TlsVersion;

    #[test]
    fn test_default_config_builds() {
        assert!(TlsConnector::new(TlsConfig::new()).is_ok());
    }

    #[test]
    fn test_trusting_config_builds() {
        let connector = TlsConnector::new(TlsConfig::new().trust_server_certificate(true)).unwrap();
        assert!(!connector.config().validates_certificate());
    }

    #[test]
    fn test_strict_config_advertises_alpn() {
        let config = TlsConfig::new().strict_mode(true);
        let client = build_client_config(&config).unwrap();
        assert_eq!(client.alpn_protocols, vec![b"tds/8.0".to_vec()]);
    }

    #[test]
    fn test_tls13_only() {
        let config = TlsConfig::new().min_protocol_version(TlsVersion::Tls13);
        assert!(build_client_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_root_certificate() {
        let config = TlsConfig::new().add_root_certificate(CertificateDer::from(vec![1, 2, 3]));
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_invalid_server_name() {
        let connector = TlsConnector::new(TlsConfig::new()).unwrap();
        assert!(matches!(
            connector.server_name("not a host name"),
            Err(TlsError::InvalidServerName(_))
        ));
        assert!(connector.server_name("db.example.net").is_ok());
        assert!(connector.server_name("10.1.2.3").is_ok());
    }
}
