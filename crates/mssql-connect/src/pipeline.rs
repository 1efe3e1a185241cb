//! The ordered stages of one connection attempt.
//!
//! Each stage mutates the [`ConnectionContext`]. The driver stops at the
//! first stage that fails and leaves its error in the context for the
//! orchestrator to classify.

use tracing::Instrument;
use uuid::Uuid;

use crate::context::ConnectionContext;
use crate::datasource::{DataSource, Protocol};
use crate::error::{Result, Stage};
use crate::stream::StreamSlot;
use crate::transport::{self, ssrp};
use crate::{login, prelogin, tls};

/// A step of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Parse the data source, or adopt the redirect or failover target.
    ParseDataSource,
    /// Resolve the port over SSRP if needed and open the transport.
    CreateTransport,
    /// TLS before any TDS traffic (strict mode only).
    TlsFirst,
    /// PRELOGIN exchange.
    PreLogin,
    /// TLS negotiated by PRELOGIN.
    Tls,
    /// Send LOGIN7.
    Login,
    /// Read the login response.
    LoginResponse,
}

impl PipelineStage {
    /// Stages in execution order.
    pub const ALL: [PipelineStage; 7] = [
        Self::ParseDataSource,
        Self::CreateTransport,
        Self::TlsFirst,
        Self::PreLogin,
        Self::Tls,
        Self::Login,
        Self::LoginResponse,
    ];

    /// Stage reported in errors.
    #[must_use]
    pub fn stage(self) -> Stage {
        match self {
            Self::ParseDataSource => Stage::DataSource,
            Self::CreateTransport => Stage::Transport,
            Self::TlsFirst | Self::Tls => Stage::Tls,
            Self::PreLogin => Stage::PreLogin,
            Self::Login => Stage::Login,
            Self::LoginResponse => Stage::LoginResponse,
        }
    }

    async fn run(self, ctx: &mut ConnectionContext) -> Result<()> {
        ctx.budget.check(self.stage())?;
        match self {
            Self::ParseDataSource => parse_data_source(ctx),
            Self::CreateTransport => create_transport(ctx).await,
            Self::TlsFirst => tls::run_before_prelogin(ctx).await,
            Self::PreLogin => prelogin::run(ctx).await,
            Self::Tls => tls::run_after_prelogin(ctx).await,
            Self::Login => login::run(ctx).await,
            Self::LoginResponse => login::run_response(ctx).await,
        }
    }
}

fn parse_data_source(ctx: &mut ConnectionContext) -> Result<()> {
    let data_source = match (&ctx.routed_to, &ctx.failover_to) {
        (Some(target), _) | (None, Some(target)) => target.clone(),
        (None, None) => DataSource::parse(&ctx.config.data_source)?,
    };
    tracing::debug!(
        protocol = %data_source.protocol,
        server = %data_source.server_name,
        port = ?data_source.port,
        instance = ?data_source.instance_name,
        "data source resolved"
    );
    ctx.data_source = Some(data_source);
    Ok(())
}

/// Fill in the TCP port from the SQL Server Browser when the data source
/// names an instance or asks for the admin connection.
async fn resolve_port(ctx: &mut ConnectionContext) -> Result<()> {
    let Some(ds) = ctx.data_source.as_mut() else {
        return Ok(());
    };
    if !ds.ssrp_required || ds.port.is_some() {
        return Ok(());
    }
    let deadline = ctx.budget.deadline;
    let browser_port = ctx.config.browser_port;
    let port = match ds.protocol {
        Protocol::Admin => {
            let instance = ds
                .instance_name
                .as_deref()
                .unwrap_or(ssrp::DEFAULT_DAC_INSTANCE);
            ssrp::resolve_dac_port(&ds.server_name, instance, browser_port, deadline).await?
        }
        Protocol::Unspecified | Protocol::Tcp => match ds.instance_name.as_deref() {
            Some(instance) => {
                ssrp::resolve_instance_port(&ds.server_name, instance, browser_port, deadline)
                    .await?
            }
            None => return Ok(()),
        },
        Protocol::NamedPipe | Protocol::SharedMemory => return Ok(()),
    };
    ds.port = Some(port);
    ctx.port_from_ssrp = true;
    Ok(())
}

async fn create_transport(ctx: &mut ConnectionContext) -> Result<()> {
    let budget = ctx.budget.clone();
    budget.run(Stage::Transport, resolve_port(ctx)).await?;

    let data_source = ctx.require_data_source()?.clone();
    let transport = budget
        .run(
            Stage::Transport,
            transport::open(&data_source, budget.deadline),
        )
        .await?;

    let id = Uuid::new_v4();
    ctx.connection_id = Some(id);
    ctx.span.record("connection_id", tracing::field::display(id));
    ctx.stream = StreamSlot::raw(transport);
    tracing::debug!(connection_id = %id, server = %data_source.server_name, "transport open");
    Ok(())
}

/// Run every stage in order, stopping at the first error.
///
/// The error is stored in `ctx.error`; the driver itself never fails.
pub async fn run(ctx: &mut ConnectionContext) {
    for stage in PipelineStage::ALL {
        if ctx.error.is_some() {
            break;
        }
        let span = tracing::debug_span!("stage", name = ?stage);
        if let Err(error) = stage.run(ctx).instrument(span).await {
            tracing::debug!(?stage, error = %error, "stage failed");
            ctx.error = Some(error);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::Config;
    use crate::context::Budget;
    use crate::error::Error;

    fn context(data_source: &str) -> ConnectionContext {
        let config = Arc::new(Config::new().data_source(data_source));
        let budget = Budget::new(&config, CancellationToken::new());
        ConnectionContext::new(config, budget)
    }

    #[test]
    fn test_stage_order() {
        let stages: Vec<Stage> = PipelineStage::ALL.iter().map(|s| s.stage()).collect();
        assert_eq!(
            stages,
            vec![
                Stage::DataSource,
                Stage::Transport,
                Stage::Tls,
                Stage::PreLogin,
                Stage::Tls,
                Stage::Login,
                Stage::LoginResponse,
            ]
        );
    }

    #[tokio::test]
    async fn test_parse_failure_stops_pipeline() {
        let mut ctx = context("tcp:host/with/slash");
        run(&mut ctx).await;
        assert!(matches!(ctx.error, Some(Error::DataSource { .. })));
        assert!(ctx.stream.is_empty());
        assert!(ctx.connection_id.is_none());
    }

    #[tokio::test]
    async fn test_routed_target_replaces_configured() {
        let mut ctx = context("gateway");
        ctx.routed_to = Some(DataSource::parse("gateway").unwrap().rerouted("node1", 11000));
        parse_data_source(&mut ctx).unwrap();
        let ds = ctx.data_source.unwrap();
        assert_eq!(ds.server_name, "node1");
        assert_eq!(ds.port, Some(11000));
    }

    #[test]
    fn test_failover_target_replaces_configured() {
        let mut ctx = context("primary,1433");
        ctx.failover_to = Some(DataSource::parse("mirror,1444").unwrap());
        parse_data_source(&mut ctx).unwrap();
        assert_eq!(ctx.data_source.as_ref().unwrap().server_name, "mirror");

        ctx.routed_to = Some(DataSource::parse("node1,11000").unwrap());
        parse_data_source(&mut ctx).unwrap();
        assert_eq!(ctx.data_source.unwrap().server_name, "node1");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut ctx = context("127.0.0.1,1");
        ctx.budget.cancel.cancel();
        run(&mut ctx).await;
        assert!(matches!(
            ctx.error,
            Some(Error::Cancelled {
                stage: Stage::DataSource
            })
        ));
    }

    #[tokio::test]
    async fn test_port_given_skips_browser() {
        let mut ctx = context("127.0.0.1,1433");
        parse_data_source(&mut ctx).unwrap();
        resolve_port(&mut ctx).await.unwrap();
        assert!(!ctx.port_from_ssrp);
        assert_eq!(ctx.data_source.unwrap().port, Some(1433));
    }
}
