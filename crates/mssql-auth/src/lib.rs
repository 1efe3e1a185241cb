//! # mssql-auth
//!
//! Authentication inputs for the SQL Server connection handshake.
//!
//! Token acquisition and platform security packages stay outside this
//! crate; it defines the seams the handshake calls through:
//!
//! | Method | Seam | LOGIN7 carries |
//! |--------|------|----------------|
//! | SQL authentication | [`Credentials::UserPassword`] | user name and obfuscated password |
//! | Access token | [`Credentials::AccessToken`] or [`AccessTokenProvider`] | token in the FEDAUTH feature |
//! | Entra ID flows | [`AuthMethod`] + [`AccessTokenProvider`] | FEDAUTH feature, MSAL library |
//! | Integrated | [`SspiProvider`] | SSPI blob from [`SspiBufferPool`] |
//!
//! Tokens can be shared between attempts through [`TokenProviderCache`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod provider;
pub mod sspi;
pub mod token_cache;

pub use credentials::Credentials;
pub use error::AuthError;
pub use provider::{AccessToken, AccessTokenProvider, AuthMethod, StaticTokenProvider, TokenRequest};
pub use sspi::{SspiBuffer, SspiBufferPool, SspiProvider, server_spn};
pub use token_cache::TokenProviderCache;
