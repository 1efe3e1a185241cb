//! State threaded through one connection attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mssql_auth::SspiBufferPool;
use tds_protocol::{EncryptionLevel, FeatureExtAck, ServerVersion, TdsVersion};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::datasource::DataSource;
use crate::error::{Error, Result, Stage};
use crate::stream::StreamSlot;

/// Deadline and cancellation shared by every stage of a connect.
///
/// The connect timeout is turned into one absolute deadline when the
/// connect starts; stages and redirects consume it, never extend it.
#[derive(Debug, Clone)]
pub struct Budget {
    /// Absolute deadline.
    pub deadline: Instant,
    /// Cooperative cancellation.
    pub cancel: CancellationToken,
}

impl Budget {
    /// A budget ending `config.connect_timeout` from now.
    #[must_use]
    pub fn new(config: &Config, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + config.connect_timeout,
            cancel,
        }
    }

    /// Run `fut` unless cancellation or the deadline comes first.
    pub async fn run<T, F>(&self, stage: Stage, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled { stage }),
            result = timeout_at(self.deadline, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectionTimeout),
            },
        }
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The same budget, but ending no later than `limit` from now.
    #[must_use]
    pub fn limited_to(&self, limit: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + limit),
            cancel: self.cancel.clone(),
        }
    }

    /// Fail fast if cancellation already fired.
    pub fn check(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { stage });
        }
        Ok(())
    }
}

/// Encryption state inside the client during PRELOGIN and TLS.
///
/// Starts from the configured policy and is adjusted by the server's
/// answer. `Login` never goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionOption {
    /// Nothing requested yet; upgraded to `Login` or `On` by the server.
    Off,
    /// Encrypt the whole session.
    On,
    /// The client cannot or will not encrypt (also used once TLS-first
    /// has already encrypted the stream).
    NotSup,
    /// Encrypt only the LOGIN7 packet.
    Login,
}

impl EncryptionOption {
    /// Value sent in the PRELOGIN ENCRYPTION option.
    #[must_use]
    pub fn wire_level(self) -> EncryptionLevel {
        match self {
            Self::Off | Self::Login => EncryptionLevel::Off,
            Self::On => EncryptionLevel::On,
            Self::NotSup => EncryptionLevel::NotSupported,
        }
    }
}

/// Outcome of the INSTANCE check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// PRELOGIN completed normally.
    Ready,
    /// The server is not the requested instance.
    InstanceFailure,
    /// The attempt ended in a server redirect.
    Rerouted,
}

/// What the PRELOGIN exchange learned, consumed by the TLS stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreLoginContext {
    /// Current internal encryption option.
    pub internal_encryption: EncryptionOption,
    /// The server offers encryption at all.
    pub server_supports_encryption: bool,
    /// Handshake status.
    pub status: HandshakeStatus,
    /// Server product version.
    pub server_version: Option<ServerVersion>,
    /// Server's ENCRYPTION answer, if it was read.
    pub server_encryption: Option<EncryptionLevel>,
}

impl PreLoginContext {
    /// Fresh state for `internal_encryption`.
    #[must_use]
    pub fn new(internal_encryption: EncryptionOption) -> Self {
        Self {
            internal_encryption,
            server_supports_encryption: false,
            status: HandshakeStatus::Ready,
            server_version: None,
            server_encryption: None,
        }
    }
}

/// Results of a successful login.
#[derive(Debug, Clone, Default)]
pub struct LoginOutcome {
    /// TDS version acknowledged by the server.
    pub tds_version: Option<TdsVersion>,
    /// Server program name from LOGINACK.
    pub server_program: String,
    /// Server program version from LOGINACK.
    pub server_program_version: u32,
    /// Current database.
    pub database: Option<String>,
    /// Current language.
    pub language: Option<String>,
    /// Packet size confirmed by the server.
    pub packet_size: Option<u32>,
    /// Redirect target, if the server asked for one.
    pub routing: Option<(String, u16)>,
    /// Failover partner announced by the server (ENVCHANGE type 13).
    pub failover_partner: Option<String>,
    /// Acknowledged feature extensions.
    pub feature_ack: Option<FeatureExtAck>,
}

/// One superseded attempt in a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingHop {
    /// Connection id of the attempt.
    pub connection_id: Option<Uuid>,
    /// Server it talked to.
    pub server: String,
    /// Port it talked to, if TCP.
    pub port: Option<u16>,
    /// Where it was redirected.
    pub redirected_to: (String, u16),
}

/// Mutable state of one connection attempt.
///
/// Owned by a single attempt and mutated by one stage at a time. A stage
/// that fails stores its error in [`error`](Self::error); later stages see
/// it and do nothing.
#[derive(Debug)]
pub struct ConnectionContext {
    /// Configuration shared by all attempts.
    pub config: Arc<Config>,
    /// Data source this attempt targets.
    pub data_source: Option<DataSource>,
    /// Redirect target to use instead of the configured data source.
    pub routed_to: Option<DataSource>,
    /// Failover partner targeted instead of the configured data source.
    pub failover_to: Option<DataSource>,
    /// Current stream.
    pub stream: StreamSlot,
    /// Random id of the physical connection, set when the transport opens.
    pub connection_id: Option<Uuid>,
    /// Activity id carried in the PRELOGIN TRACEID.
    pub activity_id: Uuid,
    /// MARS is available on this connection.
    pub mars_capable: bool,
    /// The server requires federated authentication.
    pub fed_auth_required: bool,
    /// Access token to send, wiped once LOGIN7 is written.
    pub access_token: Option<Zeroizing<Vec<u8>>>,
    /// Error that stopped the attempt.
    pub error: Option<Error>,
    /// Attempts superseded by redirects, oldest first.
    pub routing_history: Vec<RoutingHop>,
    /// PRELOGIN state.
    pub prelogin: Option<PreLoginContext>,
    /// Login results.
    pub login: Option<LoginOutcome>,
    /// The port came from an SSRP lookup.
    pub port_from_ssrp: bool,
    /// SSPI buffers, shared by every attempt of one connect.
    pub sspi_pool: SspiBufferPool,
    /// Deadline and cancellation.
    pub budget: Budget,
    /// Span of this physical attempt; the connection id is recorded on it
    /// once the transport opens.
    pub span: tracing::Span,
}

impl ConnectionContext {
    /// Context for the first attempt.
    #[must_use]
    pub fn new(config: Arc<Config>, budget: Budget) -> Self {
        Self {
            config,
            data_source: None,
            routed_to: None,
            failover_to: None,
            stream: StreamSlot::Empty,
            connection_id: None,
            activity_id: Uuid::new_v4(),
            mars_capable: false,
            fed_auth_required: false,
            access_token: None,
            error: None,
            routing_history: Vec::new(),
            prelogin: None,
            login: None,
            port_from_ssrp: false,
            sspi_pool: SspiBufferPool::new(),
            budget,
            span: tracing::info_span!("attempt", connection_id = tracing::field::Empty),
        }
    }

    /// Context for the next attempt after a redirect to `host:port`.
    ///
    /// The superseded attempt is summarized into the routing history and
    /// its stream is dropped.
    #[must_use]
    pub fn reroute(self, host: &str, port: u16) -> Self {
        let base = self.data_source.as_ref().map(|ds| ds.rerouted(host, port));
        let hop = RoutingHop {
            connection_id: self.connection_id,
            server: self
                .data_source
                .as_ref()
                .map(|ds| ds.server_name.clone())
                .unwrap_or_default(),
            port: self.data_source.as_ref().and_then(|ds| ds.port),
            redirected_to: (host.to_string(), port),
        };
        let mut history = self.routing_history;
        history.push(hop);

        let mut next = Self::new(self.config, self.budget);
        next.routed_to = base;
        next.failover_to = self.failover_to;
        next.routing_history = history;
        next.sspi_pool = self.sspi_pool;
        next
    }

    /// Context for a retry of the same target.
    ///
    /// `target` is the redirect destination to retry, `None` to go back to
    /// the server the redirect chain started from.
    #[must_use]
    pub fn retry(self, target: Option<DataSource>) -> Self {
        let mut next = Self::new(self.config, self.budget);
        next.routed_to = target;
        next.failover_to = self.failover_to;
        next.routing_history = self.routing_history;
        next.sspi_pool = self.sspi_pool;
        next
    }

    /// Context for an attempt against the failover partner, or against the
    /// configured server when `partner` is `None`.
    #[must_use]
    pub fn fail_over(self, partner: Option<DataSource>, budget: Budget) -> Self {
        let mut next = Self::new(self.config, budget);
        next.failover_to = partner;
        next.routing_history = self.routing_history;
        next.sspi_pool = self.sspi_pool;
        next
    }

    /// Number of redirects followed so far.
    #[must_use]
    pub fn redirect_count(&self) -> usize {
        self.routing_history.len()
    }

    /// Whether this attempt targets a redirect destination.
    #[must_use]
    pub fn is_routed(&self) -> bool {
        self.routed_to.is_some()
    }

    /// Whether this attempt started from the failover partner.
    #[must_use]
    pub fn on_partner(&self) -> bool {
        self.failover_to.is_some()
    }

    /// Data source, or an argument error if parsing has not run.
    pub fn require_data_source(&self) -> Result<&DataSource> {
        self.data_source
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("data source has not been resolved".into()))
    }
}
