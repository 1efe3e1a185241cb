//! Self-signed server certificates for TLS tests.

use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::mock_server::{MockServerError, Result};

/// A certificate and key generated for one test server.
#[derive(Debug)]
pub struct ServerIdentity {
    certificate: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    /// Generate a self-signed certificate valid for `names`.
    pub fn self_signed(names: &[&str]) -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate().map_err(tls_error)?;
        let params = rcgen::CertificateParams::new(
            names.iter().map(|name| (*name).to_string()).collect::<Vec<_>>(),
        )
        .map_err(tls_error)?;
        let cert = params.self_signed(&key_pair).map_err(tls_error)?;
        let key = PrivateKeyDer::try_from(key_pair.serialize_der())
            .map_err(|e| MockServerError::Tls(e.to_string()))?;
        Ok(Self {
            certificate: cert.der().clone(),
            key,
        })
    }

    /// The certificate, for adding to a client's trust anchors.
    #[must_use]
    pub fn certificate(&self) -> CertificateDer<'static> {
        self.certificate.clone()
    }

    /// A rustls server configuration presenting this identity.
    ///
    /// `alpn` is the protocol list the server accepts; TLS-first servers
    /// pass `tds/8.0`.
    pub fn server_config(&self, alpn: Option<&[u8]>) -> Result<Arc<ServerConfig>> {
        let mut config =
            ServerConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
                .with_safe_default_protocol_versions()
                .map_err(tls_error)?
                .with_no_client_auth()
                .with_single_cert(vec![self.certificate.clone()], self.key.clone_key())
                .map_err(tls_error)?;
        // Tickets written after the handshake would still be framed as PRELOGIN.
        config.send_tls13_tickets = 0;
        if let Some(alpn) = alpn {
            config.alpn_protocols = vec![alpn.to_vec()];
        }
        Ok(Arc::new(config))
    }
}

fn tls_error(error: impl std::fmt::Display) -> MockServerError {
    MockServerError::Tls(error.to_string())
}
