//! Database mirroring failover tests against pairs of mock servers.
//!
//! ```bash
//! cargo test -p mssql-connect --test failover
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::{Duration, Instant};

use mssql_connect::{Client, Config, Credentials, EncryptMode, Error};
use mssql_testing::{MockLogin, MockTdsServer};

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config(primary: &str, partner: &str) -> Config {
    Config::new()
        .data_source(primary)
        .failover_partner(partner)
        .database("orders")
        .encrypt(EncryptMode::Off)
        .credentials(Credentials::user_password("app", "secret"))
        .connect_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn test_unreachable_primary_fails_over_to_partner() {
    let partner = MockTdsServer::builder()
        .with_database("orders")
        .with_failover_partner("primary-host")
        .build()
        .await
        .unwrap();

    let primary = format!("tcp:127.0.0.1,{}", closed_port());
    let client = Client::connect(config(&primary, &partner.data_source()))
        .await
        .unwrap();
    let info = client.info();
    assert_eq!(info.data_source.port, Some(partner.port()));
    assert_eq!(info.failover_partner.as_deref(), Some("primary-host"));
    assert_eq!(partner.login_count(), 1);
}

#[tokio::test]
async fn test_partner_without_mirroring_is_rejected() {
    let partner = MockTdsServer::builder().build().await.unwrap();

    let primary = format!("tcp:127.0.0.1,{}", closed_port());
    let err = Client::connect(config(&primary, &partner.data_source()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Failover(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("orders"));
    assert!(err.is_terminal());
    assert_eq!(partner.login_count(), 1);
}

#[tokio::test]
async fn test_reachable_primary_reports_partner() {
    let primary = MockTdsServer::builder()
        .with_failover_partner("mirror")
        .build()
        .await
        .unwrap();
    let partner = MockTdsServer::builder().build().await.unwrap();

    let client = Client::connect(config(&primary.data_source(), &partner.data_source()))
        .await
        .unwrap();
    assert_eq!(client.info().failover_partner.as_deref(), Some("mirror"));
    assert_eq!(client.info().data_source.port, Some(primary.port()));
    assert_eq!(partner.connection_count(), 0);
}

#[tokio::test]
async fn test_login_failure_does_not_fail_over() {
    let primary = MockTdsServer::builder()
        .with_login(MockLogin::reject(18456, "Login failed for user 'app'."))
        .build()
        .await
        .unwrap();
    let partner = MockTdsServer::builder()
        .with_failover_partner("primary")
        .build()
        .await
        .unwrap();

    let err = Client::connect(config(&primary.data_source(), &partner.data_source()))
        .await
        .unwrap_err();
    assert!(err.is_server_error(18456));
    assert_eq!(partner.connection_count(), 0);
}

#[tokio::test]
async fn test_transient_error_on_primary_fails_over() {
    let primary = MockTdsServer::builder()
        .with_failing_logins(1, 40613)
        .build()
        .await
        .unwrap();
    let partner = MockTdsServer::builder()
        .with_failover_partner("primary")
        .build()
        .await
        .unwrap();

    // The retry interval would exceed the timeout; failover does not wait for it.
    let config = config(&primary.data_source(), &partner.data_source())
        .connect_retry_interval(Duration::from_secs(60));
    let client = Client::connect(config).await.unwrap();
    assert_eq!(client.info().data_source.port, Some(partner.port()));
    assert_eq!(primary.login_count(), 1);
    assert_eq!(partner.login_count(), 1);
}

#[tokio::test]
async fn test_alternation_stops_at_the_deadline() {
    let primary = format!("tcp:127.0.0.1,{}", closed_port());
    let partner = format!("tcp:127.0.0.1,{}", closed_port());

    let started = Instant::now();
    let err = Client::connect(
        config(&primary, &partner).connect_timeout(Duration::from_millis(800)),
    )
    .await
    .unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err}");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(3));
}
