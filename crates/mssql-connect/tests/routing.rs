//! Redirect and connect-retry tests against mock gateways.
//!
//! ```bash
//! cargo test -p mssql-connect --test routing
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::{Duration, Instant};

use mssql_connect::{Client, Config, Credentials, EncryptMode, Error, RedirectConfig};
use mssql_testing::{MockLogin, MockTdsServer};

fn config(server: &MockTdsServer) -> Config {
    Config::new()
        .data_source(server.data_source())
        .encrypt(EncryptMode::Off)
        .credentials(Credentials::user_password("app", "secret"))
        .connect_timeout(Duration::from_secs(10))
}

/// A local port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn gateway_to(node: &MockTdsServer) -> MockTdsServer {
    MockTdsServer::builder()
        .with_login(MockLogin::redirect(node.host(), node.port()))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_follows_redirect() {
    let node = MockTdsServer::builder()
        .with_database("sales")
        .build()
        .await
        .unwrap();
    let gateway = gateway_to(&node).await;

    let client = Client::connect(config(&gateway)).await.unwrap();
    let info = client.info();
    assert_eq!(info.routed_to, Some((node.host(), node.port())));
    assert_eq!(info.redirect_count(), 1);
    assert_eq!(info.data_source.port, Some(node.port()));
    assert_eq!(info.database.as_deref(), Some("sales"));

    let hop = &info.routing_history[0];
    assert_eq!(hop.port, Some(gateway.port()));
    assert_eq!(hop.redirected_to, (node.host(), node.port()));
    assert_ne!(hop.connection_id, Some(info.connection_id));

    assert_eq!(gateway.login_count(), 1);
    assert_eq!(node.login_count(), 1);
}

#[tokio::test]
async fn test_redirect_not_followed_when_disabled() {
    let node = MockTdsServer::builder().build().await.unwrap();
    let gateway = gateway_to(&node).await;

    let err = Client::connect(config(&gateway).redirect(RedirectConfig::no_follow()))
        .await
        .unwrap_err();
    match err {
        Error::Routing { host, port } => {
            assert_eq!(host, node.host());
            assert_eq!(port, node.port());
        }
        other => panic!("expected a routing error, got {other}"),
    }
    assert_eq!(node.login_count(), 0);
}

#[tokio::test]
async fn test_transient_failure_at_redirect_target_returns_to_gateway() {
    let node = MockTdsServer::builder()
        .with_failing_logins(1, 40613)
        .build()
        .await
        .unwrap();
    let gateway = gateway_to(&node).await;

    // A long interval proves the return to the gateway does not wait.
    let config = config(&gateway)
        .connect_retry_count(1)
        .connect_retry_interval(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(5));
    let client = Client::connect(config).await.unwrap();

    assert_eq!(gateway.login_count(), 2);
    assert_eq!(node.login_count(), 2);
    assert_eq!(client.info().routed_to, Some((node.host(), node.port())));
    assert_eq!(client.info().redirect_count(), 2);
}

#[tokio::test]
async fn test_unreachable_redirect_target_returns_to_gateway() {
    let gateway = MockTdsServer::builder()
        .with_login(MockLogin::redirect("127.0.0.1", closed_port()))
        .build()
        .await
        .unwrap();

    let config = config(&gateway)
        .connect_retry_count(1)
        .connect_retry_interval(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(5));
    let started = Instant::now();
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "unexpected error: {err}");
    assert!(err.is_transient());
    assert_eq!(gateway.login_count(), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_no_retry_surfaces_redirect_target_failure() {
    let node = MockTdsServer::builder()
        .with_failing_logins(1, 40613)
        .build()
        .await
        .unwrap();
    let gateway = gateway_to(&node).await;

    let err = Client::connect(config(&gateway).connect_retry_count(0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Server { number: 40613, .. }));
    assert!(err.is_transient());
    assert_eq!(gateway.login_count(), 1);
    assert_eq!(node.login_count(), 1);
}

#[tokio::test]
async fn test_transient_failure_retried_after_interval() {
    let server = MockTdsServer::builder()
        .with_failing_logins(2, 40501)
        .build()
        .await
        .unwrap();

    let config = config(&server)
        .connect_retry_count(2)
        .connect_retry_interval(Duration::from_millis(20));
    Client::connect(config).await.unwrap();
    assert_eq!(server.login_count(), 3);
    assert_eq!(server.connection_count(), 3);
}

#[tokio::test]
async fn test_dropped_connections_retried_after_interval() {
    let server = MockTdsServer::builder()
        .with_dropped_connections(2)
        .build()
        .await
        .unwrap();

    let config = config(&server)
        .connect_retry_count(2)
        .connect_retry_interval(Duration::from_millis(200));
    let started = Instant::now();
    Client::connect(config).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(server.connection_count(), 3);
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn test_unreachable_server_retried_until_exhausted() {
    let config = Config::new()
        .data_source(format!("tcp:127.0.0.1,{}", closed_port()))
        .encrypt(EncryptMode::Off)
        .credentials(Credentials::user_password("app", "secret"))
        .connect_timeout(Duration::from_secs(10))
        .connect_retry_count(2)
        .connect_retry_interval(Duration::from_millis(200));
    let started = Instant::now();
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "unexpected error: {err}");
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockTdsServer::builder()
        .with_failing_logins(3, 40501)
        .build()
        .await
        .unwrap();

    let config = config(&server)
        .connect_retry_count(2)
        .connect_retry_interval(Duration::from_millis(10));
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Server { number: 40501, .. }));
    assert_eq!(server.login_count(), 3);
}

#[tokio::test]
async fn test_login_failure_is_not_retried() {
    let server = MockTdsServer::builder()
        .with_login(MockLogin::reject(18456, "Login failed for user 'app'."))
        .build()
        .await
        .unwrap();

    let config = config(&server)
        .connect_retry_count(3)
        .connect_retry_interval(Duration::from_millis(10));
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Server { number: 18456, .. }));
    assert!(!err.is_transient());
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn test_ten_redirects_are_followed() {
    let server = MockTdsServer::builder()
        .with_login(MockLogin::redirect_to_self(10))
        .build()
        .await
        .unwrap();

    let client = Client::connect(config(&server)).await.unwrap();
    assert_eq!(client.info().redirect_count(), 10);
    assert_eq!(server.login_count(), 11);
}

#[tokio::test]
async fn test_eleventh_redirect_is_refused() {
    let server = MockTdsServer::builder()
        .with_login(MockLogin::redirect_to_self(11))
        .build()
        .await
        .unwrap();

    let err = Client::connect(config(&server)).await.unwrap_err();
    assert!(matches!(err, Error::TooManyRedirects { max: 10 }));
    assert!(err.is_terminal());
    assert_eq!(server.login_count(), 11);
}

#[tokio::test]
async fn test_custom_redirect_limit() {
    let server = MockTdsServer::builder()
        .with_login(MockLogin::redirect_to_self(usize::MAX))
        .build()
        .await
        .unwrap();

    let err = Client::connect(config(&server).max_redirects(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TooManyRedirects { max: 2 }));
    assert_eq!(server.login_count(), 3);
}
