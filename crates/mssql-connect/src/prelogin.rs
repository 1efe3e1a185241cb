//! PRELOGIN exchange and the encryption decision.
//!
//! The client announces its version, encryption option, MARS request and
//! trace ids; the server answers with its own. [`decide_encryption`] is the
//! whole negotiation table and has no I/O, so it can be tested exhaustively.

use bytes::Bytes;
use tds_protocol::{EncryptionLevel, PacketType, PreLogin, ServerVersion, TraceId};

use crate::config::{Config, EncryptMode};
use crate::context::{ConnectionContext, EncryptionOption, HandshakeStatus, PreLoginContext};
use crate::error::{EncryptionMismatch, Error, Result, Stage};

/// Version this client reports in PRELOGIN.
#[must_use]
pub fn client_version() -> ServerVersion {
    let mut parts = env!("CARGO_PKG_VERSION")
        .split(['.', '-'])
        .map(|part| part.parse::<u16>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let build = parts.next().unwrap_or(0);
    ServerVersion::new(
        u8::try_from(major).unwrap_or(u8::MAX),
        u8::try_from(minor).unwrap_or(u8::MAX),
        build,
        0,
    )
}

/// Internal encryption option a policy starts from.
///
/// TLS-first connections are already encrypted, so they announce
/// `NOT_SUP` and ignore the server's answer.
#[must_use]
pub fn initial_encryption(mode: EncryptMode) -> EncryptionOption {
    match mode {
        EncryptMode::Off | EncryptMode::Strict => EncryptionOption::NotSup,
        EncryptMode::LoginOnly => EncryptionOption::Off,
        EncryptMode::Mandatory => EncryptionOption::On,
    }
}

/// Option announced for `config`.
///
/// Federated authentication sends tokens after LOGIN7, so login-only
/// encryption is raised to full encryption for it.
#[must_use]
pub fn requested_encryption(config: &Config) -> EncryptionOption {
    match initial_encryption(config.encrypt) {
        EncryptionOption::Off if config.uses_federated_auth() => EncryptionOption::On,
        other => other,
    }
}

/// Apply the server's ENCRYPTION answer to the client's option.
///
/// Returns the adjusted option; `Login` means only LOGIN7 is encrypted
/// and `NotSup` means the login goes out in plaintext.
pub fn decide_encryption(
    mode: EncryptMode,
    client: EncryptionOption,
    server: EncryptionLevel,
) -> Result<EncryptionOption> {
    if mode.is_tls_first() {
        return Ok(client);
    }
    if server == EncryptionLevel::NotSupported {
        return Err(Error::Encryption(EncryptionMismatch::NotSupportedByServer));
    }
    match (client, server) {
        (EncryptionOption::Off, EncryptionLevel::Off) => Ok(EncryptionOption::Login),
        (EncryptionOption::Off, _) => Ok(EncryptionOption::On),
        (EncryptionOption::NotSup, EncryptionLevel::Required) => {
            Err(Error::Encryption(EncryptionMismatch::NotSupportedByClient))
        }
        (EncryptionOption::On, EncryptionLevel::Off) => {
            Err(Error::Encryption(EncryptionMismatch::MandatoryRefused))
        }
        (other, _) => Ok(other),
    }
}

/// Build the PRELOGIN request for this attempt.
#[must_use]
pub fn build_request(ctx: &ConnectionContext, encryption: EncryptionOption) -> PreLogin {
    let trace_id = TraceId {
        connection_id: ctx.connection_id.map(|id| *id.as_bytes()).unwrap_or_default(),
        activity_id: *ctx.activity_id.as_bytes(),
        activity_sequence: 1,
    };
    PreLogin::new()
        .with_version(client_version())
        .with_encryption(encryption.wire_level())
        .with_instance("")
        .with_thread_id(std::process::id())
        .with_mars(ctx.config.mars)
        .with_trace_id(trace_id)
        .with_fed_auth_required(true)
}

/// Fold a decoded response into the context.
///
/// An instance mismatch marks the handshake failed and surfaces as
/// [`Error::InstanceMismatch`] so the caller can re-resolve the port.
pub fn apply_response(ctx: &mut ConnectionContext, response: &PreLogin) -> Result<()> {
    let mode = ctx.config.encrypt;
    let client = ctx
        .prelogin
        .as_ref()
        .map_or_else(|| initial_encryption(mode), |p| p.internal_encryption);
    let mut state = PreLoginContext::new(client);
    state.server_version = Some(response.version);
    if mode.is_tls_first() {
        state.server_supports_encryption = true;
    } else {
        state.server_encryption = Some(response.encryption);
        state.server_supports_encryption = response.encryption != EncryptionLevel::NotSupported;
    }

    if response.instance_mismatch {
        state.status = HandshakeStatus::InstanceFailure;
        ctx.prelogin = Some(state);
        let instance = ctx
            .data_source
            .as_ref()
            .and_then(|ds| ds.instance_name.clone())
            .unwrap_or_default();
        return Err(Error::InstanceMismatch { instance });
    }

    let decided = decide_encryption(mode, client, response.encryption);
    state.internal_encryption = decided.as_ref().copied().unwrap_or(client);
    ctx.prelogin = Some(state);
    let internal = decided?;

    ctx.mars_capable = ctx.config.mars && response.mars && response.version.supports_mars();
    ctx.fed_auth_required =
        ctx.config.trusts_fed_auth_required() && response.fed_auth_required == Some(true);

    tracing::debug!(
        server_version = %response.version,
        server_encryption = ?response.encryption,
        encryption = ?internal,
        mars = ctx.mars_capable,
        fed_auth_required = ctx.fed_auth_required,
        "pre-login complete"
    );
    Ok(())
}

/// Send PRELOGIN and process the answer.
pub async fn run(ctx: &mut ConnectionContext) -> Result<()> {
    let encryption = requested_encryption(&ctx.config);
    ctx.prelogin = Some(PreLoginContext::new(encryption));
    let payload = build_request(ctx, encryption).encode();

    let budget = ctx.budget.clone();
    let tls_first = ctx.config.encrypt.is_tls_first();
    let stream = &mut ctx.stream;
    let response = budget
        .run(Stage::PreLogin, exchange(stream, payload, tls_first))
        .await?;
    apply_response(ctx, &response)
}

async fn exchange(
    stream: &mut crate::stream::StreamSlot,
    payload: Bytes,
    tls_first: bool,
) -> Result<PreLogin> {
    stream.send_message(PacketType::PreLogin, payload).await?;
    let message = stream.read_message_of(PacketType::TabularResult).await?;
    let response = if tls_first {
        PreLogin::decode_tls_first(message.payload)?
    } else {
        PreLogin::decode(message.payload)?
    };
    Ok(response)
}
