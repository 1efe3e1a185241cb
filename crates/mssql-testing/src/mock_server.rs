//! Scripted TDS endpoint for connection tests.
//!
//! The server speaks just enough of the handshake to exercise a client's
//! connection pipeline without a real SQL Server:
//!
//! - PRELOGIN with a configurable ENCRYPTION byte, instance check,
//!   MARS flag and FEDAUTHREQUIRED byte (raw, so invalid values can be sent)
//! - TLS either before any TDS traffic (ALPN `tds/8.0`) or tunneled in
//!   PRELOGIN packets, including dropping it again after a login-only
//!   exchange
//! - LOGIN7 answered with a login acknowledgement, a routing ENVCHANGE or
//!   an error, optionally after a FEDAUTHINFO round trip
//!
//! Every PRELOGIN and LOGIN7 is counted and recorded for assertions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::mock_server::{MockLogin, MockTdsServer};
//!
//! #[tokio::test]
//! async fn routed_login() {
//!     let node = MockTdsServer::builder().build().await.unwrap();
//!     let gateway = MockTdsServer::builder()
//!         .with_login(MockLogin::redirect(node.host(), node.port()))
//!         .build()
//!         .await
//!         .unwrap();
//!     // Connect a client to gateway.addr()...
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mssql_codec::{CodecError, Message, PacketStream};
use mssql_tls::{TDS8_ALPN, TlsPreloginWrapper};
use rustls::pki_types::CertificateDer;
use tds_protocol::{
    Done, DoneStatus, EncryptionLevel, EnvChange, FeatureId, FedAuthInfo, Login7, LoginAck,
    PacketType, PreLogin, PreLoginOption, ProtocolError, ServerMessage, ServerVersion, TdsVersion,
    TokenType, TraceId,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio_rustls::TlsAcceptor;

use crate::identity::ServerIdentity;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Malformed client message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Certificate or TLS setup failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The client did something the script does not allow.
    #[error("unexpected client behavior: {0}")]
    Unexpected(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// FEDAUTH library value for a pre-acquired security token.
const FED_AUTH_SECURITY_TOKEN: u8 = 0x01;

/// Login error class used for scripted failures.
const LOGIN_ERROR_CLASS: u8 = 14;

/// Where TLS runs, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockTls {
    /// No certificate; TLS requests fail.
    #[default]
    Disabled,
    /// TLS negotiated by PRELOGIN and tunneled through PRELOGIN packets.
    Negotiated,
    /// TLS before any TDS traffic, advertising ALPN `tds/8.0`.
    Strict,
}

/// Target of a scripted redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    /// The server's own address.
    Itself,
    /// Another endpoint.
    Host(String, u16),
}

/// How LOGIN7 is answered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockLogin {
    /// LOGINACK with database and packet size changes.
    #[default]
    Accept,
    /// Routing ENVCHANGE for the first `times` logins, then accept.
    Redirect {
        /// Where to send the client.
        target: RedirectTarget,
        /// Logins answered with a redirect.
        times: usize,
    },
    /// ERROR token and a DONE with the error bit on every login.
    Reject {
        /// Server error number.
        number: i32,
        /// Message text.
        message: String,
    },
}

impl MockLogin {
    /// Always redirect to `host:port`.
    pub fn redirect(host: impl Into<String>, port: u16) -> Self {
        Self::Redirect {
            target: RedirectTarget::Host(host.into(), port),
            times: usize::MAX,
        }
    }

    /// Redirect to this server `times` times, then accept.
    #[must_use]
    pub fn redirect_to_self(times: usize) -> Self {
        Self::Redirect {
            target: RedirectTarget::Itself,
            times,
        }
    }

    /// Reject every login with `number`.
    pub fn reject(number: i32, message: impl Into<String>) -> Self {
        Self::Reject {
            number,
            message: message.into(),
        }
    }
}

/// Server behavior.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Program name in LOGINACK.
    pub server_name: String,
    /// Database reported after login.
    pub database: String,
    /// Product version in the PRELOGIN answer.
    pub version: ServerVersion,
    /// Raw ENCRYPTION byte in the PRELOGIN answer.
    pub encryption: u8,
    /// MARS byte in the PRELOGIN answer.
    pub mars: bool,
    /// Raw FEDAUTHREQUIRED byte; `None` omits the option.
    pub fed_auth_required: Option<u8>,
    /// Answer every PRELOGIN with an instance mismatch.
    pub instance_mismatch: bool,
    /// TLS placement.
    pub tls: MockTls,
    /// LOGIN7 answer.
    pub login: MockLogin,
    /// Fail this many logins with `transient_error` before the scripted answer.
    pub failing_logins: usize,
    /// Error number used for those failures.
    pub transient_error: i32,
    /// Sent as FEDAUTHINFO to clients that negotiate a token workflow.
    pub fed_auth_info: FedAuthInfo,
    /// Packet size confirmed in ENVCHANGE.
    pub packet_size: u32,
    /// Hold the login answer for this long.
    pub login_delay: Option<Duration>,
    /// Mirroring partner announced on a successful login.
    pub failover_partner: Option<String>,
    /// Close this many connections right after accepting them.
    pub dropped_connections: usize,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            server_name: "Microsoft SQL Server".to_string(),
            database: "master".to_string(),
            version: ServerVersion::new(16, 0, 1000, 6),
            encryption: EncryptionLevel::Off as u8,
            mars: true,
            fed_auth_required: None,
            instance_mismatch: false,
            tls: MockTls::Disabled,
            login: MockLogin::Accept,
            failing_logins: 0,
            transient_error: 40613,
            fed_auth_info: FedAuthInfo {
                sts_url: "https://login.example.com/tenant".to_string(),
                spn: "https://database.example.com/".to_string(),
            },
            packet_size: 4096,
            login_delay: None,
            failover_partner: None,
            dropped_connections: 0,
        }
    }
}

/// Builder for the mock server.
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer PRELOGIN with `level`.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.encryption = level as u8;
        self
    }

    /// Answer PRELOGIN with an arbitrary ENCRYPTION byte.
    #[must_use]
    pub fn with_raw_encryption(mut self, raw: u8) -> Self {
        self.config.encryption = raw;
        self
    }

    /// Accept TLS tunneled through PRELOGIN packets.
    #[must_use]
    pub fn with_negotiated_tls(mut self) -> Self {
        self.config.tls = MockTls::Negotiated;
        self
    }

    /// Require TLS before any TDS traffic.
    #[must_use]
    pub fn with_strict_tls(mut self) -> Self {
        self.config.tls = MockTls::Strict;
        self
    }

    /// Send FEDAUTHREQUIRED with a raw byte.
    #[must_use]
    pub fn with_fed_auth_required(mut self, raw: u8) -> Self {
        self.config.fed_auth_required = Some(raw);
        self
    }

    /// Report an instance mismatch on every PRELOGIN.
    #[must_use]
    pub fn with_instance_mismatch(mut self) -> Self {
        self.config.instance_mismatch = true;
        self
    }

    /// Set the MARS answer.
    #[must_use]
    pub fn with_mars(mut self, mars: bool) -> Self {
        self.config.mars = mars;
        self
    }

    /// Set the product version.
    #[must_use]
    pub fn with_version(mut self, version: ServerVersion) -> Self {
        self.config.version = version;
        self
    }

    /// Set how LOGIN7 is answered.
    #[must_use]
    pub fn with_login(mut self, login: MockLogin) -> Self {
        self.config.login = login;
        self
    }

    /// Fail the first `count` logins with error `number`.
    #[must_use]
    pub fn with_failing_logins(mut self, count: usize, number: i32) -> Self {
        self.config.failing_logins = count;
        self.config.transient_error = number;
        self
    }

    /// Set the FEDAUTHINFO content.
    #[must_use]
    pub fn with_fed_auth_info(mut self, info: FedAuthInfo) -> Self {
        self.config.fed_auth_info = info;
        self
    }

    /// Set the program name.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set the database reported after login.
    #[must_use]
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Confirm `size` as the packet size.
    #[must_use]
    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.config.packet_size = size;
        self
    }

    /// Delay the login answer.
    #[must_use]
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.config.login_delay = Some(delay);
        self
    }

    /// Announce `partner` as the mirroring partner on accepted logins.
    #[must_use]
    pub fn with_failover_partner(mut self, partner: impl Into<String>) -> Self {
        self.config.failover_partner = Some(partner.into());
        self
    }

    /// Close the first `count` connections without answering.
    #[must_use]
    pub fn with_dropped_connections(mut self, count: usize) -> Self {
        self.config.dropped_connections = count;
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

/// What a client sent in PRELOGIN.
#[derive(Debug, Clone)]
pub struct RecordedPreLogin {
    /// ENCRYPTION offered.
    pub encryption: EncryptionLevel,
    /// Instance requested.
    pub instance: String,
    /// MARS requested.
    pub mars: bool,
    /// FEDAUTHREQUIRED sent by the client.
    pub fed_auth_required: Option<bool>,
    /// Correlation ids.
    pub trace_id: Option<TraceId>,
    /// The exchange ran over TLS.
    pub encrypted: bool,
}

/// What a client sent in LOGIN7.
#[derive(Debug, Clone)]
pub struct RecordedLogin {
    /// Requested TDS version.
    pub tds_version: TdsVersion,
    /// Login name.
    pub username: String,
    /// Server name the client targeted.
    pub server_name: String,
    /// Initial database.
    pub database: String,
    /// Access token, from the FEDAUTH feature or a FEDAUTH_TOKEN message.
    pub fed_auth_token: Option<Vec<u8>>,
    /// LOGIN7 arrived over TLS.
    pub encrypted: bool,
    /// ALPN protocol negotiated on a TLS-first connection.
    pub alpn: Option<Vec<u8>>,
}

struct Shared {
    config: MockServerConfig,
    addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    connections: AtomicUsize,
    prelogin_count: AtomicUsize,
    login_count: AtomicUsize,
    failures_left: AtomicUsize,
    drops_left: AtomicUsize,
    redirects_left: AtomicUsize,
    prelogins: Mutex<Vec<RecordedPreLogin>>,
    logins: Mutex<Vec<RecordedLogin>>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("addr", &self.addr)
            .field("tls", &self.acceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn acceptor(&self) -> Result<&TlsAcceptor> {
        self.acceptor.as_ref().ok_or_else(|| {
            MockServerError::Unexpected("client negotiated TLS but the server has none".into())
        })
    }
}

/// A mock TDS server listening on a local port.
#[derive(Debug)]
pub struct MockTdsServer {
    shared: Arc<Shared>,
    certificate: Option<CertificateDer<'static>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (acceptor, certificate) = match config.tls {
            MockTls::Disabled => (None, None),
            MockTls::Negotiated | MockTls::Strict => {
                let identity = ServerIdentity::self_signed(&["localhost"])?;
                let alpn = (config.tls == MockTls::Strict).then_some(TDS8_ALPN);
                let acceptor = TlsAcceptor::from(identity.server_config(alpn)?);
                (Some(acceptor), Some(identity.certificate()))
            }
        };

        let redirects = match &config.login {
            MockLogin::Redirect { times, .. } => *times,
            _ => 0,
        };
        let shared = Arc::new(Shared {
            failures_left: AtomicUsize::new(config.failing_logins),
            drops_left: AtomicUsize::new(config.dropped_connections),
            redirects_left: AtomicUsize::new(redirects),
            config,
            addr,
            acceptor,
            connections: AtomicUsize::new(0),
            prelogin_count: AtomicUsize::new(0),
            login_count: AtomicUsize::new(0),
            prelogins: Mutex::new(Vec::new()),
            logins: Mutex::new(Vec::new()),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let shared = Arc::clone(&accept_shared);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, shared).await {
                                        tracing::debug!(%peer, error = %e, "mock connection ended");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "accept error");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            shared,
            certificate,
            shutdown_tx,
        })
    }

    /// Get the server's listening address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    /// Get the host string for connection configuration.
    #[must_use]
    pub fn host(&self) -> String {
        self.shared.addr.ip().to_string()
    }

    /// Get the port number.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.shared.addr.port()
    }

    /// Data source string for this server, `host,port`.
    #[must_use]
    pub fn data_source(&self) -> String {
        format!("tcp:{},{}", self.host(), self.port())
    }

    /// The self-signed certificate, when TLS is enabled.
    ///
    /// It is issued for `localhost`.
    #[must_use]
    pub fn certificate(&self) -> Option<CertificateDer<'static>> {
        self.certificate.clone()
    }

    /// Connections accepted.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// PRELOGIN messages answered.
    #[must_use]
    pub fn prelogin_count(&self) -> usize {
        self.shared.prelogin_count.load(Ordering::SeqCst)
    }

    /// LOGIN7 messages received.
    #[must_use]
    pub fn login_count(&self) -> usize {
        self.shared.login_count.load(Ordering::SeqCst)
    }

    /// PRELOGIN requests in arrival order.
    pub async fn prelogins(&self) -> Vec<RecordedPreLogin> {
        self.shared.prelogins.lock().await.clone()
    }

    /// LOGIN7 requests in arrival order.
    pub async fn logins(&self) -> Vec<RecordedLogin> {
        self.shared.logins.lock().await.clone()
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Scope of TLS agreed in PRELOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsScope {
    LoginOnly,
    Session,
}

/// What the client will do after this PRELOGIN exchange.
fn negotiated_tls(client: EncryptionLevel, server: u8) -> Option<TlsScope> {
    let server = EncryptionLevel::from_u8(server).ok()?;
    match (client, server) {
        (EncryptionLevel::NotSupported, _) | (_, EncryptionLevel::NotSupported) => None,
        (EncryptionLevel::Off, EncryptionLevel::Off) => Some(TlsScope::LoginOnly),
        _ => Some(TlsScope::Session),
    }
}

/// Context of the LOGIN7 exchange on one connection.
#[derive(Debug, Clone, Default)]
struct Channel {
    encrypted: bool,
    alpn: Option<Vec<u8>>,
}

async fn handle_connection(tcp: TcpStream, shared: Arc<Shared>) -> Result<()> {
    shared.connections.fetch_add(1, Ordering::SeqCst);
    if take_one(&shared.drops_left) {
        tracing::debug!("dropping connection");
        return Ok(());
    }

    if shared.config.tls == MockTls::Strict {
        let tls = shared.acceptor()?.accept(tcp).await?;
        let channel = Channel {
            encrypted: true,
            alpn: tls.get_ref().1.alpn_protocol().map(<[u8]>::to_vec),
        };
        let mut stream = PacketStream::new(tls);
        answer_prelogin(&mut stream, &shared, true).await?;
        let login = stream.read_message_of(PacketType::Tds7Login).await?;
        return answer_login(&mut stream, &login, &shared, channel).await;
    }

    let mut stream = PacketStream::new(tcp);
    let request = answer_prelogin(&mut stream, &shared, false).await?;
    let Some(scope) = negotiated_tls(request.encryption, shared.config.encryption) else {
        let login = stream.read_message_of(PacketType::Tds7Login).await?;
        return answer_login(&mut stream, &login, &shared, Channel::default()).await;
    };

    let acceptor = shared.acceptor()?;
    let mut tls = acceptor
        .accept(TlsPreloginWrapper::new(stream.into_inner()?))
        .await?;
    tls.get_mut().0.handshake_complete();
    let mut secure = PacketStream::new(tls);
    let login = secure.read_message_of(PacketType::Tds7Login).await?;
    let channel = Channel {
        encrypted: true,
        alpn: None,
    };

    match scope {
        TlsScope::Session => answer_login(&mut secure, &login, &shared, channel).await,
        TlsScope::LoginOnly => {
            let (wrapper, _session) = secure.into_inner()?.into_inner();
            tracing::trace!("login-only TLS dropped");
            let mut plain = PacketStream::new(wrapper.into_inner());
            answer_login(&mut plain, &login, &shared, channel).await
        }
    }
}

async fn answer_prelogin<S>(
    stream: &mut PacketStream<S>,
    shared: &Shared,
    encrypted: bool,
) -> Result<PreLogin>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = stream.read_message_of(PacketType::PreLogin).await?;
    let request = PreLogin::decode(message.payload)?;
    shared.prelogin_count.fetch_add(1, Ordering::SeqCst);
    shared.prelogins.lock().await.push(RecordedPreLogin {
        encryption: request.encryption,
        instance: request.instance.clone(),
        mars: request.mars,
        fed_auth_required: request.fed_auth_required,
        trace_id: request.trace_id,
        encrypted,
    });

    stream
        .send_message(PacketType::TabularResult, prelogin_response(&shared.config))
        .await?;
    Ok(request)
}

/// Build the PRELOGIN answer by hand so out-of-range bytes can be sent.
fn prelogin_response(config: &MockServerConfig) -> Bytes {
    let mut options = vec![
        (PreLoginOption::Version, config.version.to_bytes().to_vec()),
        (PreLoginOption::Encryption, vec![config.encryption]),
        (PreLoginOption::Instance, vec![u8::from(config.instance_mismatch)]),
        (PreLoginOption::ThreadId, Vec::new()),
        (PreLoginOption::Mars, vec![u8::from(config.mars)]),
    ];
    if let Some(raw) = config.fed_auth_required {
        options.push((PreLoginOption::FedAuthRequired, vec![raw]));
    }

    // id (1) + offset (2) + length (2) per option, then the terminator
    let table_len = options.len() * 5 + 1;
    let mut table = BytesMut::with_capacity(table_len);
    let mut data = BytesMut::new();
    for (option, value) in &options {
        table.put_u8(*option as u8);
        table.put_u16((table_len + data.len()) as u16);
        table.put_u16(value.len() as u16);
        data.put_slice(value);
    }
    table.put_u8(PreLoginOption::Terminator as u8);
    table.put_slice(&data);
    table.freeze()
}

async fn answer_login<S>(
    stream: &mut PacketStream<S>,
    message: &Message,
    shared: &Shared,
    channel: Channel,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let login = Login7::decode(&message.payload)?;
    shared.login_count.fetch_add(1, Ordering::SeqCst);
    let config = &shared.config;

    let mut token = None;
    if let Some(feature) = login.feature(FeatureId::FedAuth) {
        let library = feature.first().copied().unwrap_or_default() >> 1;
        if library == FED_AUTH_SECURITY_TOKEN {
            token = feature.get(5..).map(<[u8]>::to_vec);
        } else {
            token = Some(exchange_fed_auth_token(stream, &config.fed_auth_info).await?);
        }
    }

    shared.logins.lock().await.push(RecordedLogin {
        tds_version: login.tds_version,
        username: login.username.clone(),
        server_name: login.server_name.clone(),
        database: login.database.clone(),
        fed_auth_token: token,
        encrypted: channel.encrypted,
        alpn: channel.alpn,
    });

    if let Some(delay) = config.login_delay {
        tokio::time::sleep(delay).await;
    }

    let mut reply = BytesMut::new();
    if take_one(&shared.failures_left) {
        encode_error(&mut reply, config.transient_error, "The service is busy.");
    } else {
        match &config.login {
            MockLogin::Reject { number, message } => encode_error(&mut reply, *number, message),
            MockLogin::Redirect { target, .. } if take_one(&shared.redirects_left) => {
                let (host, port) = match target {
                    RedirectTarget::Itself => (shared.addr.ip().to_string(), shared.addr.port()),
                    RedirectTarget::Host(host, port) => (host.clone(), *port),
                };
                encode_login_ack(&mut reply, config, login.tds_version);
                EnvChange::Routing { host, port }.encode(&mut reply);
                Done::final_ok().encode(&mut reply);
            }
            MockLogin::Accept | MockLogin::Redirect { .. } => {
                EnvChange::Database {
                    new: config.database.clone(),
                    old: String::new(),
                }
                .encode(&mut reply);
                EnvChange::PacketSize(config.packet_size).encode(&mut reply);
                if let Some(partner) = &config.failover_partner {
                    EnvChange::FailoverPartner(partner.clone()).encode(&mut reply);
                }
                encode_login_ack(&mut reply, config, login.tds_version);
                Done::final_ok().encode(&mut reply);
            }
        }
    }

    stream
        .send_message(PacketType::TabularResult, reply.freeze())
        .await?;
    Ok(())
}

/// Send FEDAUTHINFO and read the token the client answers with.
async fn exchange_fed_auth_token<S>(
    stream: &mut PacketStream<S>,
    info: &FedAuthInfo,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    info.encode(&mut buf);
    stream
        .send_message(PacketType::TabularResult, buf.freeze())
        .await?;

    let mut payload = stream
        .read_message_of(PacketType::FedAuthToken)
        .await?
        .payload;
    if payload.remaining() < 8 {
        return Err(MockServerError::Unexpected("short FEDAUTH_TOKEN message".into()));
    }
    let _data_len = payload.get_u32_le();
    let token_len = payload.get_u32_le() as usize;
    if payload.remaining() < token_len {
        return Err(MockServerError::Unexpected(format!(
            "FEDAUTH_TOKEN announces {token_len} bytes, {} present",
            payload.remaining()
        )));
    }
    Ok(payload.split_to(token_len).to_vec())
}

/// Decrement `counter` if it is non-zero.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn encode_login_ack(dst: &mut BytesMut, config: &MockServerConfig, requested: TdsVersion) {
    let version = config.version;
    LoginAck {
        interface: 1,
        tds_version: requested,
        prog_name: config.server_name.clone(),
        prog_version: (u32::from(version.major) << 24)
            | (u32::from(version.minor) << 16)
            | u32::from(version.build),
    }
    .encode(dst);
}

fn encode_error(dst: &mut BytesMut, number: i32, message: &str) {
    ServerMessage {
        number,
        state: 1,
        class: LOGIN_ERROR_CLASS,
        message: message.to_string(),
        server: "mock".to_string(),
        procedure: String::new(),
        line: 1,
    }
    .encode(TokenType::Error, dst);
    Done {
        status: DoneStatus::ERROR,
        cur_cmd: 0,
        row_count: 0,
    }
    .encode(dst);
}
