//! Deadline, cancellation and blocking-connect tests.
//!
//! ```bash
//! cargo test -p mssql-connect --test cancellation
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::{Duration, Instant};

use mssql_connect::{Client, Config, Credentials, EncryptMode, Error, Stage};
use mssql_testing::MockTdsServer;
use tokio_util::sync::CancellationToken;

fn config(server: &MockTdsServer) -> Config {
    Config::new()
        .data_source(server.data_source())
        .encrypt(EncryptMode::Off)
        .credentials(Credentials::user_password("app", "secret"))
        .connect_timeout(Duration::from_secs(10))
        .connect_retry_count(0)
}

#[tokio::test]
async fn test_cancel_while_waiting_for_login_response() {
    let server = MockTdsServer::builder()
        .with_login_delay(Duration::from_secs(30))
        .build()
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = Client::connect_with_cancel(config(&server), cancel)
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Cancelled { stage: Stage::LoginResponse }),
        "unexpected error: {err}"
    );
    assert!(err.is_terminal());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn test_connect_timeout_while_waiting_for_login_response() {
    let server = MockTdsServer::builder()
        .with_login_delay(Duration::from_secs(30))
        .build()
        .await
        .unwrap();

    let started = Instant::now();
    let err = Client::connect(config(&server).connect_timeout(Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_retry_interval_counts_against_timeout() {
    let server = MockTdsServer::builder()
        .with_failing_logins(1, 40613)
        .build()
        .await
        .unwrap();

    let config = config(&server)
        .connect_retry_count(1)
        .connect_retry_interval(Duration::from_secs(30))
        .connect_timeout(Duration::from_millis(500));
    let started = Instant::now();
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.login_count(), 1);
}

#[test]
fn test_connect_blocking() {
    // The mock needs a runtime of its own; connect_blocking builds another.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let server = runtime
        .block_on(MockTdsServer::builder().with_database("orders").build())
        .unwrap();

    let mut client = Client::connect_blocking(config(&server)).unwrap();
    assert_eq!(client.info().database.as_deref(), Some("orders"));

    let packet_size = client.run(|client| async move { client.info().packet_size });
    assert_eq!(packet_size, 4096);
    assert_eq!(server.login_count(), 1);

    let (_runtime, client) = client.into_inner();
    assert!(client.info().redirect_count() == 0);
    drop(server);
}
