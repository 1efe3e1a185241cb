//! # mssql-tls
//!
//! TLS for the SQL Server connection handshake.
//!
//! Where TLS starts depends on the encryption mode:
//!
//! ```text
//! TLS-first (strict):  connect → TLS (ALPN tds/8.0) → PRELOGIN → LOGIN7
//! Negotiated:          connect → PRELOGIN → TLS in PRELOGIN packets → LOGIN7
//! ```
//!
//! [`TlsConnector::connect`] handles the first order and
//! [`TlsConnector::connect_tunneled`] the second, using
//! [`TlsPreloginWrapper`] to frame handshake records until the handshake is
//! over. Whether certificates are validated, and against which host name,
//! is decided by [`TlsConfig`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_wrapper;

pub use config::{TDS8_ALPN, TlsConfig, TlsVersion};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_wrapper::TlsPreloginWrapper;

pub use tokio_rustls::client::TlsStream;
