//! Connection orchestration.
//!
//! [`Client::connect`] drives the stage pipeline and decides what happens
//! between attempts:
//!
//! ```text
//! attempt ──ok──────────────────────────────▶ Client
//!    │ routing ENVCHANGE ──▶ reroute (≤ max_redirects) ──▶ attempt
//!    │ INSTANCE mismatch on an SSRP port ──▶ re-resolve once ──▶ attempt
//!    │ transient error (network, timeout, transient server number)
//!    │    at a redirect target ──▶ back to the gateway ──▶ attempt
//!    │    with a failover partner ──▶ other server of the pair ──▶ attempt
//!    │    at the configured target ──▶ wait retry interval ──▶ attempt
//!    └ anything else ──▶ error
//! ```
//!
//! Every attempt shares one deadline and one cancellation token. With a
//! failover partner each attempt also runs under a slice of that deadline,
//! see [`crate::failover`].

use std::sync::Arc;

use tds_protocol::{ServerVersion, TdsVersion};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::context::{Budget, ConnectionContext, EncryptionOption, RoutingHop};
use crate::datasource::DataSource;
use crate::error::{Error, Result, Stage};
use crate::failover::FailoverSchedule;
use crate::pipeline;
use crate::stream::StreamSlot;

/// What the handshake established.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Id of the physical connection.
    pub connection_id: Uuid,
    /// Endpoint the session is connected to.
    pub data_source: DataSource,
    /// Redirect target, if the session was routed.
    pub routed_to: Option<(String, u16)>,
    /// Redirects followed, oldest first.
    pub routing_history: Vec<RoutingHop>,
    /// TDS version acknowledged by the server.
    pub tds_version: Option<TdsVersion>,
    /// Server program name.
    pub server_program: String,
    /// Server product version from PRELOGIN.
    pub server_version: Option<ServerVersion>,
    /// Current database.
    pub database: Option<String>,
    /// Mirroring partner announced by the server.
    pub failover_partner: Option<String>,
    /// Negotiated packet size.
    pub packet_size: usize,
    /// MARS is available.
    pub mars: bool,
    /// The server required federated authentication.
    pub fed_auth_required: bool,
    /// Encryption in effect after PRELOGIN; `None` for TLS-first sessions.
    pub encryption: Option<EncryptionOption>,
    /// Traffic on the returned stream is encrypted.
    pub encrypted: bool,
}

impl ConnectionInfo {
    /// Number of redirects followed.
    #[must_use]
    pub fn redirect_count(&self) -> usize {
        self.routing_history.len()
    }
}

/// An authenticated connection, ready for requests.
#[derive(Debug)]
pub struct Client {
    stream: StreamSlot,
    info: ConnectionInfo,
}

impl Client {
    /// Connect using `config`.
    pub async fn connect(config: Config) -> Result<Self> {
        Self::connect_with_cancel(config, CancellationToken::new()).await
    }

    /// Connect using `config`; cancelling `cancel` aborts the attempt at
    /// the current stage.
    pub async fn connect_with_cancel(config: Config, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;
        let span = tracing::info_span!("connect", data_source = %config.data_source);
        establish(Arc::new(config), cancel).instrument(span).await
    }

    /// Connect from synchronous code.
    ///
    /// Runs the handshake on a dedicated current-thread runtime that stays
    /// alive with the returned connection.
    pub fn connect_blocking(config: Config) -> Result<BlockingClient> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = runtime.block_on(Self::connect(config))?;
        Ok(BlockingClient { runtime, client })
    }

    /// Handshake results.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// The framed stream, for sending requests.
    pub fn stream_mut(&mut self) -> &mut StreamSlot {
        &mut self.stream
    }

    /// Split into the stream and the handshake results.
    #[must_use]
    pub fn into_parts(self) -> (StreamSlot, ConnectionInfo) {
        (self.stream, self.info)
    }

    fn from_context(mut ctx: ConnectionContext) -> Result<Self> {
        let login = ctx.login.take().unwrap_or_default();
        let data_source = ctx.require_data_source()?.clone();
        let connection_id = ctx
            .connection_id
            .ok_or_else(|| Error::InvalidArgument("no transport was opened".into()))?;
        let routed_to = if ctx.is_routed() {
            ctx.routing_history.last().map(|hop| hop.redirected_to.clone())
        } else {
            None
        };
        if ctx.on_partner() && login.failover_partner.is_none() {
            return Err(Error::Failover(format!(
                "server '{}', database '{}' is not configured for database mirroring",
                data_source.server_name,
                ctx.config.database.as_deref().unwrap_or_default()
            )));
        }
        let prelogin = ctx.prelogin.take();
        let stream = ctx.stream.take();

        let info = ConnectionInfo {
            connection_id,
            routed_to,
            routing_history: std::mem::take(&mut ctx.routing_history),
            tds_version: login.tds_version,
            server_program: login.server_program,
            server_version: prelogin.as_ref().and_then(|p| p.server_version),
            database: login.database,
            failover_partner: login.failover_partner,
            packet_size: stream.packet_size().unwrap_or_default(),
            mars: ctx.mars_capable,
            fed_auth_required: ctx.fed_auth_required,
            encryption: if ctx.config.encrypt.is_tls_first() {
                None
            } else {
                prelogin.map(|p| p.internal_encryption)
            },
            encrypted: stream.is_encrypted(),
            data_source,
        };
        tracing::info!(
            connection_id = %info.connection_id,
            server = %info.data_source.server_name,
            redirects = info.redirect_count(),
            encrypted = info.encrypted,
            "connected"
        );
        Ok(Self { stream, info })
    }
}

/// A [`Client`] together with the runtime that drives its I/O.
#[derive(Debug)]
pub struct BlockingClient {
    runtime: tokio::runtime::Runtime,
    client: Client,
}

impl BlockingClient {
    /// Handshake results.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        self.client.info()
    }

    /// Run `f` against the connection on its runtime.
    pub fn run<'a, F, Fut, T>(&'a mut self, f: F) -> T
    where
        F: FnOnce(&'a mut Client) -> Fut,
        Fut: std::future::Future<Output = T> + 'a,
    {
        let Self { runtime, client } = self;
        runtime.block_on(f(client))
    }

    /// Release the connection and its runtime.
    #[must_use]
    pub fn into_inner(self) -> (tokio::runtime::Runtime, Client) {
        (self.runtime, self.client)
    }
}

async fn establish(config: Arc<Config>, cancel: CancellationToken) -> Result<Client> {
    let budget = Budget::new(&config, cancel);
    let policy = config.retry_policy();
    let max_redirects = config.redirect.max_redirects;
    let mut failover = config
        .failover_partner
        .as_deref()
        .map(DataSource::parse)
        .transpose()?
        .map(|partner| FailoverSchedule::new(partner, config.connect_timeout));
    let first_budget = match &failover {
        Some(schedule) => budget.limited_to(schedule.first_timeout()),
        None => budget.clone(),
    };
    let mut ctx = ConnectionContext::new(Arc::clone(&config), first_budget);
    let mut retries = 0u8;
    let mut instance_resolved_again = false;

    loop {
        let attempt = ctx.span.clone();
        pipeline::run(&mut ctx).instrument(attempt).await;

        if let Some(error) = ctx.error.take() {
            if matches!(error, Error::InstanceMismatch { .. })
                && ctx.port_from_ssrp
                && !instance_resolved_again
            {
                tracing::info!(error = %error, "instance mismatch, resolving the port again");
                instance_resolved_again = true;
                let target = ctx.routed_to.clone();
                ctx = ctx.retry(target);
                continue;
            }

            if !error.is_transient() || budget.is_expired() {
                tracing::debug!(error = %error, "connection attempt failed");
                return Err(error);
            }

            if ctx.is_routed() && policy.should_retry(retries) {
                retries += 1;
                tracing::info!(
                    error = %error,
                    retry = retries,
                    "transient error at the redirect target, returning to the gateway"
                );
                ctx = ctx.retry(None);
                continue;
            }

            if let Some(schedule) = failover.as_mut() {
                let Some(next) = schedule.advance(budget.remaining()) else {
                    tracing::debug!(error = %error, "no time left for another failover attempt");
                    return Err(error);
                };
                tracing::info!(
                    error = %error,
                    partner = next.target.is_some(),
                    timeout = ?next.timeout,
                    "transient error, trying the other server of the mirror pair"
                );
                if let Some(pause) = next.pause {
                    pause_for(&budget, pause).await?;
                }
                ctx = ctx.fail_over(next.target, budget.limited_to(next.timeout));
                continue;
            }

            if policy.should_retry(retries) {
                retries += 1;
                tracing::info!(
                    error = %error,
                    retry = retries,
                    interval = ?policy.interval,
                    "transient error, retrying"
                );
                pause_for(&budget, policy.interval).await?;
                ctx = ctx.retry(None);
                continue;
            }

            tracing::debug!(error = %error, retries, "connection retries exhausted");
            return Err(error);
        }

        let routing = ctx.login.as_ref().and_then(|login| login.routing.clone());
        match routing {
            Some((host, port)) if !config.redirect.follow_redirects => {
                return Err(Error::Routing { host, port });
            }
            Some(_) if ctx.redirect_count() >= usize::from(max_redirects) => {
                tracing::warn!(max_redirects, "redirect limit reached");
                return Err(Error::TooManyRedirects { max: max_redirects });
            }
            Some((host, port)) => {
                tracing::info!(
                    host = %host,
                    port,
                    redirect = ctx.redirect_count() + 1,
                    max_redirects,
                    "following routing redirect"
                );
                ctx = ctx.reroute(&host, port);
            }
            None => return Client::from_context(ctx),
        }
    }
}

/// Sleep for `pause`, charged to the connect budget.
async fn pause_for(budget: &Budget, pause: std::time::Duration) -> Result<()> {
    budget
        .run(Stage::Transport, async {
            tokio::time::sleep(pause).await;
            Ok(())
        })
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_invalid_config_rejected_before_io() {
        let err = Client::connect(Config::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_parse_error_surfaces() {
        let err = Client::connect(Config::new().data_source("np:/bad/pipe"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataSource { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_connect() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = Config::new()
            .data_source("127.0.0.1,1")
            .connect_timeout(Duration::from_secs(5));
        let err = Client::connect_with_cancel(config, cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_invalid_failover_partner_rejected_before_io() {
        let config = Config::new()
            .data_source("127.0.0.1,1")
            .database("orders")
            .failover_partner("tcp:a/b");
        let err = Client::connect(config).await.unwrap_err();
        assert!(matches!(err, Error::DataSource { .. }));
    }

    #[test]
    fn test_blocking_connect_reports_errors() {
        let err = Client::connect_blocking(Config::new().data_source("tcp:a/b")).unwrap_err();
        assert!(matches!(err, Error::DataSource { .. }));
    }
}
