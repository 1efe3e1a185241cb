//! TLS handshakes against an in-process rustls server.

#![allow(clippy::unwrap_used, missing_docs)]

use std::sync::Arc;

use mssql_tls::{TDS8_ALPN, TlsConfig, TlsConnector, TlsPreloginWrapper};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio_rustls::TlsAcceptor;

fn server_identity() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let key = PrivateKeyDer::try_from(key_pair.serialize_der()).unwrap();
    (cert.der().clone(), key)
}

fn acceptor(alpn: Option<&[u8]>) -> (TlsAcceptor, CertificateDer<'static>) {
    let (cert, key) = server_identity();
    let mut config = rustls::ServerConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.clone()], key)
    .unwrap();
    // Tickets written after the handshake would still be framed.
    config.send_tls13_tickets = 0;
    if let Some(alpn) = alpn {
        config.alpn_protocols = vec![alpn.to_vec()];
    }
    (TlsAcceptor::from(Arc::new(config)), cert)
}

#[tokio::test]
async fn tunneled_handshake_then_raw_records() {
    let (acceptor, cert) = acceptor(None);
    let (client_io, server_io) = duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let mut tls = acceptor
            .accept(TlsPreloginWrapper::new(server_io))
            .await
            .unwrap();
        tls.get_mut().0.handshake_complete();
        let mut buf = [0u8; 5];
        tls.read_exact(&mut buf).await.unwrap();
        tls.write_all(&buf).await.unwrap();
        tls.flush().await.unwrap();
    });

    let connector = TlsConnector::new(TlsConfig::new().add_root_certificate(cert)).unwrap();
    let mut tls = connector
        .connect_tunneled(client_io, "localhost")
        .await
        .unwrap();
    assert!(!tls.get_ref().0.is_tunneling());

    tls.write_all(b"login").await.unwrap();
    tls.flush().await.unwrap();
    let mut echoed = [0u8; 5];
    tls.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"login");
    server.await.unwrap();
}

#[tokio::test]
async fn strict_handshake_negotiates_tds8_alpn() {
    let (acceptor, cert) = acceptor(Some(TDS8_ALPN));
    let (client_io, server_io) = duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let tls = acceptor.accept(server_io).await.unwrap();
        tls.get_ref().1.alpn_protocol().map(<[u8]>::to_vec)
    });

    let config = TlsConfig::new().strict_mode(true).add_root_certificate(cert);
    let connector = TlsConnector::new(config).unwrap();
    let tls = connector.connect(client_io, "localhost").await.unwrap();

    assert_eq!(tls.get_ref().1.alpn_protocol(), Some(TDS8_ALPN));
    assert_eq!(server.await.unwrap().as_deref(), Some(TDS8_ALPN));
}

#[tokio::test]
async fn untrusted_certificate_fails_validation() {
    let (acceptor, _cert) = acceptor(None);
    let (client_io, server_io) = duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = acceptor.accept(TlsPreloginWrapper::new(server_io)).await;
    });

    let connector = TlsConnector::new(TlsConfig::new()).unwrap();
    let err = connector
        .connect_tunneled(client_io, "localhost")
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn trusted_server_certificate_skips_validation() {
    let (acceptor, _cert) = acceptor(None);
    let (client_io, server_io) = duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = acceptor.accept(TlsPreloginWrapper::new(server_io)).await;
    });

    let connector = TlsConnector::new(TlsConfig::new().trust_server_certificate(true)).unwrap();
    assert!(connector.connect_tunneled(client_io, "localhost").await.is_ok());
}

#[tokio::test]
async fn host_name_in_certificate_overrides_target() {
    let (acceptor, cert) = acceptor(None);
    let (client_io, server_io) = duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = acceptor.accept(TlsPreloginWrapper::new(server_io)).await;
    });

    let config = TlsConfig::new()
        .add_root_certificate(cert)
        .with_host_name_in_certificate("localhost");
    let connector = TlsConnector::new(config).unwrap();
    assert!(connector.connect_tunneled(client_io, "10.0.0.7").await.is_ok());
}
