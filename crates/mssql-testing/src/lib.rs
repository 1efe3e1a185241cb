//! # mssql-testing
//!
//! In-process doubles for testing SQL Server connection establishment.
//!
//! - [`MockTdsServer`]: a TCP endpoint that runs a scripted PRELOGIN, TLS
//!   and LOGIN7 exchange and records what the client sent
//! - [`MockBrowser`]: a UDP SQL Server Browser answering instance and DAC
//!   port lookups
//! - [`ServerIdentity`]: self-signed certificates for TLS tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::{MockBrowser, MockTdsServer};
//!
//! #[tokio::test]
//! async fn named_instance() {
//!     let server = MockTdsServer::builder().build().await.unwrap();
//!     let browser = MockBrowser::builder()
//!         .with_instance("SQLEXPRESS", server.port())
//!         .build()
//!         .await
//!         .unwrap();
//!     // Connect to 127.0.0.1\SQLEXPRESS with the browser port set to
//!     // browser.port()...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod identity;
pub mod mock_browser;
pub mod mock_server;

pub use identity::ServerIdentity;
pub use mock_browser::{MockBrowser, MockBrowserBuilder};
pub use mock_server::{
    MockLogin, MockServerBuilder, MockServerConfig, MockServerError, MockTdsServer, MockTls,
    RecordedLogin, RecordedPreLogin, RedirectTarget,
};
