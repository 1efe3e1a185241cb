//! Live SQL Server handshake tests.
//!
//! These tests require a running SQL Server instance. They are ignored by default
//! and can be run with:
//!
//! ```bash
//! # Set connection details via environment variables
//! export MSSQL_HOST=localhost
//! export MSSQL_USER=sa
//! export MSSQL_PASSWORD=YourPassword
//! export MSSQL_ENCRYPT=false  # For development servers without TLS
//!
//! cargo test -p mssql-connect --test live_server -- --ignored
//! ```
//!
//! For CI/CD, use Docker:
//! ```bash
//! docker run -e 'ACCEPT_EULA=Y' -e 'SA_PASSWORD=YourStrong@Passw0rd' \
//!     -p 1433:1433 mcr.microsoft.com/mssql/server:2022-latest
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use mssql_connect::{Client, Config, Credentials, EncryptMode, Error};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn host() -> Option<String> {
    std::env::var("MSSQL_HOST").ok()
}

fn port() -> u16 {
    std::env::var("MSSQL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1433)
}

fn encrypt_mode() -> EncryptMode {
    match std::env::var("MSSQL_ENCRYPT").as_deref() {
        Ok("strict") => EncryptMode::Strict,
        Ok("true") => EncryptMode::Mandatory,
        _ => EncryptMode::LoginOnly,
    }
}

/// Helper to get test configuration from environment variables.
fn get_test_config() -> Option<Config> {
    let host = host()?;
    let user = std::env::var("MSSQL_USER").unwrap_or_else(|_| "sa".into());
    let password = std::env::var("MSSQL_PASSWORD").unwrap_or_else(|_| "MyStrongPassw0rd".into());
    let database = std::env::var("MSSQL_DATABASE").unwrap_or_else(|_| "master".into());

    Some(
        Config::new()
            .data_source(format!("tcp:{host},{}", port()))
            .encrypt(encrypt_mode())
            .trust_server_certificate(true)
            .credentials(Credentials::user_password(user, password))
            .database(database)
            .connect_timeout(Duration::from_secs(15)),
    )
}

#[tokio::test]
#[ignore = "Requires SQL Server"]
async fn test_basic_connection() {
    init_tracing();
    let config = get_test_config().expect("SQL Server config required");

    let client = Client::connect(config).await.expect("Failed to connect");
    let info = client.info();
    assert!(info.tds_version.is_some());
    assert!(info.server_version.is_some());
    assert!(info.packet_size >= 512);
}

#[tokio::test]
#[ignore = "Requires SQL Server"]
async fn test_connection_with_invalid_credentials() {
    init_tracing();
    let config = get_test_config()
        .expect("SQL Server config required")
        .credentials(Credentials::user_password("invalid_user", "wrong_password"));

    let err = Client::connect(config).await.unwrap_err();
    assert!(err.is_server_error(18456), "unexpected error: {err}");
}

#[tokio::test]
#[ignore = "Requires SQL Server"]
async fn test_unknown_database() {
    init_tracing();
    let config = get_test_config()
        .expect("SQL Server config required")
        .database("database_that_does_not_exist")
        .connect_retry_count(0);

    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Server { .. }), "unexpected error: {err}");
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_blocking_connection() {
    init_tracing();
    let config = get_test_config().expect("SQL Server config required");

    let client = Client::connect_blocking(config).expect("Failed to connect");
    assert!(client.info().tds_version.is_some());
}
