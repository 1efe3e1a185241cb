//! Authentication methods and the access-token callback.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::AuthError;

/// Authentication method requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum AuthMethod {
    /// Nothing chosen; SQL credentials if present.
    #[default]
    NotSpecified,
    /// SQL Server user name and password.
    SqlPassword,
    /// Integrated Windows authentication through SSPI.
    Integrated,
    /// Entra ID user name and password.
    ActiveDirectoryPassword,
    /// Entra ID with the logged-on Windows identity.
    ActiveDirectoryIntegrated,
    /// Entra ID interactive sign-in.
    ActiveDirectoryInteractive,
    /// Entra ID service principal.
    ActiveDirectoryServicePrincipal,
    /// Entra ID device code flow.
    ActiveDirectoryDeviceCodeFlow,
    /// Entra ID managed identity.
    ActiveDirectoryManagedIdentity,
    /// Entra ID managed identity, legacy name.
    ActiveDirectoryMsi,
    /// Entra ID default credential chain.
    ActiveDirectoryDefault,
    /// Entra ID workload identity.
    ActiveDirectoryWorkloadIdentity,
}

impl AuthMethod {
    /// Whether this is one of the Entra ID (federated) methods.
    #[must_use]
    pub fn is_active_directory(self) -> bool {
        !matches!(self, Self::NotSpecified | Self::SqlPassword | Self::Integrated)
    }

    /// Whether LOGIN7 carries an SSPI blob instead of credentials.
    #[must_use]
    pub fn is_sspi(self) -> bool {
        matches!(self, Self::Integrated)
    }

    /// Whether LOGIN7 carries a user name and password.
    #[must_use]
    pub fn uses_login7_credentials(self) -> bool {
        matches!(self, Self::NotSpecified | Self::SqlPassword)
    }

    /// Stable name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSpecified => "NotSpecified",
            Self::SqlPassword => "SqlPassword",
            Self::Integrated => "Integrated",
            Self::ActiveDirectoryPassword => "ActiveDirectoryPassword",
            Self::ActiveDirectoryIntegrated => "ActiveDirectoryIntegrated",
            Self::ActiveDirectoryInteractive => "ActiveDirectoryInteractive",
            Self::ActiveDirectoryServicePrincipal => "ActiveDirectoryServicePrincipal",
            Self::ActiveDirectoryDeviceCodeFlow => "ActiveDirectoryDeviceCodeFlow",
            Self::ActiveDirectoryManagedIdentity => "ActiveDirectoryManagedIdentity",
            Self::ActiveDirectoryMsi => "ActiveDirectoryMSI",
            Self::ActiveDirectoryDefault => "ActiveDirectoryDefault",
            Self::ActiveDirectoryWorkloadIdentity => "ActiveDirectoryWorkloadIdentity",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a token callback is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// Method that triggered the request.
    pub method: AuthMethod,
    /// Server the token is for.
    pub server: String,
    /// Database named in the configuration.
    pub database: Option<String>,
    /// User name, if one was configured.
    pub user: Option<String>,
}

/// Opaque bearer token. The bytes are wiped when dropped.
#[derive(Clone)]
pub struct AccessToken {
    token: Zeroizing<Vec<u8>>,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// Wrap token bytes that never expire.
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            expires_at: None,
        }
    }

    /// Set the expiry instant.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: Instant) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.token
    }

    /// Expiry instant, if known.
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Whether the token is usable at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: Instant) -> bool {
        !self.token.is_empty() && self.expires_at.is_none_or(|at| at > now)
    }

    /// Copy the bytes out into a buffer the caller will wipe.
    #[must_use]
    pub fn to_zeroizing_vec(&self) -> Zeroizing<Vec<u8>> {
        self.token.clone()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("len", &self.token.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies access tokens for federated authentication.
///
/// Implemented by the application; token acquisition itself (MSAL, managed
/// identity endpoints) happens outside this crate.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Produce a token for `request`.
    async fn acquire_token(&self, request: &TokenRequest) -> Result<AccessToken, AuthError>;
}

/// A fixed token, useful when the caller already holds one.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    /// Always answer with `token`.
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn acquire_token(&self, _request: &TokenRequest) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}
