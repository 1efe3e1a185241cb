//! TLS error types.

use thiserror::Error;

/// Errors raised while setting up or running a TLS handshake.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsError {
    /// The handshake did not complete.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The target host cannot be used as a TLS server name.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// A trust anchor could not be parsed.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Transport failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by rustls.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

impl TlsError {
    /// Whether retrying the connection might succeed.
    ///
    /// Configuration and name errors are permanent; a failed handshake or a
    /// dropped transport is treated as transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HandshakeFailed(_) | Self::Io(_))
    }
}
