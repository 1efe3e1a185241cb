//! Authentication error types.

use thiserror::Error;

/// Errors raised while preparing authentication material.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Credentials do not fit the selected method.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The token callback failed.
    #[error("failed to acquire token: {0}")]
    TokenAcquisition(String),

    /// The token callback returned an empty token.
    #[error("access token callback returned an empty token")]
    EmptyToken,

    /// No provider is registered for the method.
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    /// The SSPI provider failed.
    #[error("SSPI error: {0}")]
    Sspi(String),

    /// An SSPI blob exceeds the provider's declared maximum.
    #[error("SSPI blob of {len} bytes exceeds the maximum of {max}")]
    SspiBlobTooLarge {
        /// Produced length.
        len: usize,
        /// Declared maximum.
        max: usize,
    },

    /// Mutually exclusive options were combined.
    #[error("configuration error: {0}")]
    Configuration(String),
}
