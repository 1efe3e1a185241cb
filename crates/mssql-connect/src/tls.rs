//! TLS negotiation at the three points the handshake allows it.

use mssql_tls::TlsConnector;

use crate::config::EncryptMode;
use crate::context::{ConnectionContext, EncryptionOption, PreLoginContext};
use crate::error::{Error, Result, Stage};
use crate::stream::StreamSlot;

/// When TLS is set up relative to PRELOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsTiming {
    /// Before any TDS traffic (TDS 8.0 strict mode).
    Before,
    /// After PRELOGIN, tunneled in PRELOGIN packets, for the whole session.
    After,
    /// After PRELOGIN, tunneled, removed again once LOGIN7 is sent.
    LoginOnly,
}

impl TlsTiming {
    /// Timing for a policy and the PRELOGIN outcome, or `None` for a
    /// plaintext session.
    #[must_use]
    pub fn resolve(mode: EncryptMode, prelogin: Option<&PreLoginContext>) -> Option<Self> {
        if mode.is_tls_first() {
            return Some(Self::Before);
        }
        match prelogin?.internal_encryption {
            EncryptionOption::On => Some(Self::After),
            EncryptionOption::Login => Some(Self::LoginOnly),
            EncryptionOption::Off | EncryptionOption::NotSup => None,
        }
    }
}

/// Perform the handshake for `timing` and swap the stream in place.
pub async fn negotiate(ctx: &mut ConnectionContext, timing: TlsTiming) -> Result<()> {
    let host = ctx.require_data_source()?.server_name.clone();
    let connector = TlsConnector::new(ctx.config.effective_tls())?;
    let transport = ctx.stream.take().into_transport()?;
    let budget = ctx.budget.clone();

    tracing::debug!(?timing, host = %host, "starting TLS");
    ctx.stream = match timing {
        TlsTiming::Before => {
            let tls = budget
                .run(Stage::Tls, async {
                    connector.connect(transport, &host).await.map_err(Error::from)
                })
                .await?;
            StreamSlot::Tls(mssql_codec::PacketStream::new(tls))
        }
        TlsTiming::After | TlsTiming::LoginOnly => {
            let tls = budget
                .run(Stage::Tls, async {
                    connector
                        .connect_tunneled(transport, &host)
                        .await
                        .map_err(Error::from)
                })
                .await?;
            StreamSlot::Tunneled(mssql_codec::PacketStream::new(tls))
        }
    };
    Ok(())
}

/// Stage run before PRELOGIN: only acts in strict mode.
pub async fn run_before_prelogin(ctx: &mut ConnectionContext) -> Result<()> {
    if ctx.config.encrypt.is_tls_first() {
        negotiate(ctx, TlsTiming::Before).await?;
    }
    Ok(())
}

/// Stage run after PRELOGIN: encrypts according to the negotiated option.
pub async fn run_after_prelogin(ctx: &mut ConnectionContext) -> Result<()> {
    if ctx.config.encrypt.is_tls_first() {
        return Ok(());
    }
    match TlsTiming::resolve(ctx.config.encrypt, ctx.prelogin.as_ref()) {
        Some(timing) => negotiate(ctx, timing).await,
        None => {
            tracing::warn!("server accepted a plaintext login; credentials are not encrypted");
            Ok(())
        }
    }
}
