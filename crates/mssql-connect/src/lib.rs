//! # mssql-connect
//!
//! Async connection establishment for SQL Server over TDS.
//!
//! A connect runs an ordered pipeline of stages against one mutable
//! connection context:
//!
//! ```text
//! data source ─▶ transport (SSRP, TCP, named pipe) ─▶ [TLS first]
//!     ─▶ PRELOGIN ─▶ [TLS] ─▶ LOGIN7 ─▶ login response
//! ```
//!
//! The orchestrator around it follows server redirects (10 by default),
//! retries transient failures, returns to the gateway when a redirect
//! target fails and alternates with a database mirroring partner when one
//! is configured. One deadline and one cancellation token cover all of it.
//!
//! ## Encryption
//!
//! | [`EncryptMode`] | PRELOGIN offer | Result |
//! |-----------------|----------------|--------|
//! | `Off` | `NOT_SUP` | plaintext login if the server allows it |
//! | `LoginOnly` | `OFF` | LOGIN7 encrypted; whole session if the server asks |
//! | `Mandatory` | `ON` | whole session encrypted, or an error |
//! | `Strict` | `NOT_SUP` | TLS before any TDS traffic (TDS 8.0) |
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_connect::{Client, Config, Credentials, EncryptMode};
//!
//! # async fn example() -> Result<(), mssql_connect::Error> {
//! let config = Config::new()
//!     .data_source(r"tcp:db.example.com\sales")
//!     .encrypt(EncryptMode::Mandatory)
//!     .credentials(Credentials::user_password("app", "secret"))
//!     .database("orders");
//!
//! let client = Client::connect(config).await?;
//! println!("connected to {}", client.info().data_source);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod chain;
pub mod client;
pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod failover;
pub mod login;
pub mod pipeline;
pub mod prelogin;
pub mod stream;
pub mod tls;
pub mod transport;

pub use client::{BlockingClient, Client, ConnectionInfo};
pub use config::{ApplicationIntent, Config, EncryptMode, RedirectConfig, RetryPolicy};
pub use context::{ConnectionContext, EncryptionOption, RoutingHop};
pub use datasource::{DataSource, Protocol};
pub use error::{EncryptionMismatch, Error, Result, Stage};
pub use mssql_auth::{AccessToken, AccessTokenProvider, AuthMethod, Credentials, TokenProviderCache};
pub use mssql_tls::TlsConfig;
pub use stream::StreamSlot;
