//! LOGIN7 construction, sending and login response processing.
//!
//! Credentials are chosen in a fixed order: an SSPI blob for integrated
//! authentication, a pre-acquired access token, an access token callback
//! answered after the server's FEDAUTHINFO, and finally SQL credentials.
//! Encoded credentials travel in a [`SecretPayload`], which is zeroed as
//! soon as the framing layer has written it.

use std::fmt;
use std::ops::Deref;

use bytes::{BufMut, Bytes, BytesMut};
use mssql_auth::{AuthError, AuthMethod, Credentials, SspiBufferPool, TokenRequest, server_spn};
use tds_protocol::{
    EnvChange, FedAuthFeature, FedAuthInfo, FedAuthLibrary, Login7, MsalWorkflow, PacketType,
    RequestedFeatures, Token, TokenParser,
};
use zeroize::{Zeroize, Zeroizing};

use crate::config::{ApplicationIntent, Config};
use crate::context::{ConnectionContext, HandshakeStatus, LoginOutcome};
use crate::datasource::{DataSource, machine_name};
use crate::error::{Error, Result, Stage};
use crate::prelogin::client_version;
use crate::stream::StreamSlot;
use crate::tls::TlsTiming;

/// Feature extensions requested on every login.
pub const BASE_FEATURES: RequestedFeatures = RequestedFeatures::COLUMN_ENCRYPTION
    .union(RequestedFeatures::GLOBAL_TRANSACTIONS)
    .union(RequestedFeatures::DATA_CLASSIFICATION)
    .union(RequestedFeatures::UTF8_SUPPORT)
    .union(RequestedFeatures::DNS_CACHING);

/// MSAL workflow advertised for an authentication method.
#[must_use]
pub fn msal_workflow(method: AuthMethod) -> MsalWorkflow {
    match method {
        AuthMethod::ActiveDirectoryPassword | AuthMethod::ActiveDirectoryServicePrincipal => {
            MsalWorkflow::Password
        }
        AuthMethod::ActiveDirectoryIntegrated => MsalWorkflow::Integrated,
        _ => MsalWorkflow::Interactive,
    }
}

/// Access token the configuration supplies up front, if any.
fn configured_token(config: &Config) -> Option<Zeroizing<Vec<u8>>> {
    if let Some(token) = &config.access_token {
        return Some(token.to_zeroizing_vec());
    }
    match &config.credentials {
        Credentials::AccessToken { token } => Some(Zeroizing::new(token.clone())),
        _ => None,
    }
}

fn packed_client_version() -> u32 {
    let v = client_version();
    (u32::from(v.major) << 24) | (u32::from(v.minor) << 16) | u32::from(v.build)
}

/// Build the LOGIN7 record for `target`.
///
/// A pre-acquired token is taken out of `access_token`; the record wipes
/// its copy when dropped.
pub fn build_login(
    config: &Config,
    target: &DataSource,
    fed_auth_required: bool,
    access_token: &mut Option<Zeroizing<Vec<u8>>>,
    sspi: &SspiBufferPool,
) -> Result<Login7> {
    let mut features = BASE_FEATURES;
    if config.connect_retry_count > 0 {
        features |= RequestedFeatures::SESSION_RECOVERY;
    }

    let mut login = Login7::new()
        .with_tds_version(config.encrypt.tds_version())
        .with_packet_size(u32::from(config.packet_size))
        .with_hostname(config.workstation_id.clone().unwrap_or_else(machine_name))
        .with_app_name(config.application_name.clone())
        .with_server_name(target.server_name.clone())
        .with_read_only_intent(config.application_intent == ApplicationIntent::ReadOnly)
        .with_user_instance(config.user_instance)
        .with_features(features);
    login.client_prog_version = packed_client_version();

    if let Some(database) = &config.database {
        login = login.with_database(database.clone());
    }
    if let Some(language) = &config.language {
        login = login.with_language(language.clone());
    }
    if let Some(path) = &config.attach_db_filename {
        login = login.with_attach_db_file(path.clone());
    }
    if let Some(password) = &config.new_password {
        login = login.with_new_password(password.as_str());
    }

    if config.authentication.is_sspi() {
        let provider = config.sspi_provider.as_deref().ok_or_else(|| {
            AuthError::Configuration("integrated authentication requires an SSPI provider".into())
        })?;
        let spn = server_spn(&target.server_name, target.port, target.instance_name.as_deref());
        let blob = sspi.initial_blob(provider, &spn)?;
        tracing::debug!(spn = %spn, len = blob.len(), "SSPI blob ready");
        return Ok(login.with_sspi(blob.to_vec()));
    }

    if config.uses_federated_auth() {
        let library = match access_token.take() {
            Some(token) => FedAuthLibrary::SecurityToken(token.to_vec()),
            None if config.access_token_callback.is_some() => {
                FedAuthLibrary::Msal(msal_workflow(config.authentication))
            }
            None => {
                return Err(AuthError::Configuration(format!(
                    "{} authentication has no access token source",
                    config.authentication
                ))
                .into());
            }
        };
        return Ok(login.with_fed_auth(FedAuthFeature {
            library,
            fed_auth_required_echo: fed_auth_required,
        }));
    }

    match &config.credentials {
        Credentials::UserPassword { username, password } => {
            Ok(login.with_sql_auth(username.clone(), password.clone()))
        }
        _ => Err(AuthError::InvalidCredentials(
            "SQL authentication requires a user name and password".into(),
        )
        .into()),
    }
}

/// A message body carrying credentials.
///
/// The framing layer borrows the buffer through a shared handle. Once every
/// packet has been written and dropped the buffer is unique again and is
/// zeroed in place. Dropping the payload wipes it as well, which covers a
/// send abandoned by a timeout or cancellation.
pub struct SecretPayload(Bytes);

impl SecretPayload {
    /// Take ownership of an encoded message.
    #[must_use]
    pub fn new(buf: BytesMut) -> Self {
        Self(buf.freeze())
    }

    fn share(&self) -> Bytes {
        self.0.clone()
    }

    /// Zero the buffer. Returns `false` while a packet still refers to it.
    pub fn wipe(&mut self) -> bool {
        match std::mem::take(&mut self.0).try_into_mut() {
            Ok(mut buf) => {
                buf.zeroize();
                self.0 = buf.freeze();
                true
            }
            Err(shared) => {
                self.0 = shared;
                false
            }
        }
    }

    /// Send as one message of `packet_type`, then wipe.
    pub async fn send(mut self, stream: &mut StreamSlot, packet_type: PacketType) -> Result<()> {
        let sent = stream.send_message(packet_type, self.share()).await;
        if !self.wipe() {
            tracing::warn!(?packet_type, "credential buffer still shared after send");
        }
        sent
    }
}

impl Deref for SecretPayload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SecretPayload {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            self.wipe();
        }
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPayload")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// Payload of a FEDAUTHTOKEN message.
#[must_use]
pub fn fed_auth_token_payload(token: &[u8]) -> SecretPayload {
    let mut buf = BytesMut::with_capacity(8 + token.len());
    buf.put_u32_le((4 + token.len()) as u32);
    buf.put_u32_le(token.len() as u32);
    buf.put_slice(token);
    SecretPayload::new(buf)
}

/// Build and send LOGIN7. Login-only TLS is removed right after.
pub async fn run(ctx: &mut ConnectionContext) -> Result<()> {
    let target = ctx.require_data_source()?.clone();
    if ctx.access_token.is_none() {
        ctx.access_token = configured_token(&ctx.config);
    }

    let login = build_login(
        &ctx.config,
        &target,
        ctx.fed_auth_required,
        &mut ctx.access_token,
        &ctx.sspi_pool,
    )?;
    ctx.access_token = None;
    let payload = SecretPayload::new(login.encode()?);
    drop(login);

    let budget = ctx.budget.clone();
    budget
        .run(Stage::Login, payload.send(&mut ctx.stream, PacketType::Tds7Login))
        .await?;
    tracing::debug!(server = %target.server_name, "LOGIN7 sent");

    if TlsTiming::resolve(ctx.config.encrypt, ctx.prelogin.as_ref()) == Some(TlsTiming::LoginOnly) {
        ctx.stream = ctx.stream.take().drop_login_tls()?;
    }
    Ok(())
}

/// Accumulates the tokens of a login response.
#[derive(Debug, Default)]
pub struct LoginResponse {
    outcome: LoginOutcome,
    error: Option<Error>,
    login_ack: bool,
    done_error: bool,
    done: bool,
    fed_auth_info: Option<FedAuthInfo>,
}

impl LoginResponse {
    /// Start an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one message payload into the response.
    pub fn apply(&mut self, payload: Bytes) -> Result<()> {
        let mut parser = TokenParser::new(payload);
        while let Some(token) = parser.next_token()? {
            match token {
                Token::LoginAck(ack) => {
                    tracing::debug!(
                        tds_version = %ack.tds_version,
                        program = %ack.prog_name,
                        "login acknowledged"
                    );
                    self.login_ack = true;
                    self.outcome.tds_version = Some(ack.tds_version);
                    self.outcome.server_program = ack.prog_name;
                    self.outcome.server_program_version = ack.prog_version;
                }
                Token::EnvChange(change) => self.apply_env_change(change),
                Token::Error(message) => {
                    tracing::debug!(number = message.number, message = %message.message, "login error");
                    if self.error.is_none() {
                        self.error = Some(message.into());
                    }
                }
                Token::Info(message) => {
                    tracing::info!(number = message.number, message = %message.message, "server message");
                }
                Token::FeatureExtAck(ack) => self.outcome.feature_ack = Some(ack),
                Token::FedAuthInfo(info) => self.fed_auth_info = Some(info),
                Token::Sspi(_) => {
                    return Err(AuthError::UnsupportedMethod(
                        "multi-step SSPI negotiation".into(),
                    )
                    .into());
                }
                Token::Done(done) => {
                    self.done = true;
                    self.done_error |= done.has_error();
                }
            }
        }
        Ok(())
    }

    fn apply_env_change(&mut self, change: EnvChange) {
        match change {
            EnvChange::Database { new, .. } => self.outcome.database = Some(new),
            EnvChange::Language(language) => self.outcome.language = Some(language),
            EnvChange::PacketSize(size) => self.outcome.packet_size = Some(size),
            EnvChange::Routing { host, port } => {
                tracing::info!(host = %host, port, "server requested routing");
                self.outcome.routing = Some((host, port));
            }
            EnvChange::FailoverPartner(partner) => {
                tracing::debug!(partner = %partner, "server announced a failover partner");
                self.outcome.failover_partner = Some(partner);
            }
            EnvChange::Collation(_) | EnvChange::Other { .. } => {}
        }
    }

    /// FEDAUTHINFO waiting for a token, if the server sent one.
    pub fn take_fed_auth_info(&mut self) -> Option<FedAuthInfo> {
        self.fed_auth_info.take()
    }

    /// Whether the final DONE arrived.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Outcome so far, used to apply the packet size between messages.
    #[must_use]
    pub fn outcome(&self) -> &LoginOutcome {
        &self.outcome
    }

    /// Resolve the response into an outcome or the error that ended it.
    pub fn finish(self) -> Result<LoginOutcome> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.outcome.routing.is_some() {
            return Ok(self.outcome);
        }
        if self.done_error {
            return Err(Error::LoginFailed(
                "the server reported an error without details".into(),
            ));
        }
        if !self.login_ack {
            return Err(Error::LoginFailed(
                "the server ended the login without acknowledging it".into(),
            ));
        }
        Ok(self.outcome)
    }
}

async fn acquire_token(config: &Config, target: &DataSource, info: &FedAuthInfo) -> Result<Zeroizing<Vec<u8>>> {
    let provider = config.access_token_callback.as_ref().ok_or_else(|| {
        AuthError::Configuration("the server asked for a token but no callback is set".into())
    })?;
    let request = TokenRequest {
        method: config.authentication,
        server: if info.spn.is_empty() {
            target.server_name.clone()
        } else {
            info.spn.clone()
        },
        database: config.database.clone(),
        user: config.credentials.username().map(str::to_owned),
    };
    tracing::debug!(method = %request.method, server = %request.server, sts = %info.sts_url, "acquiring access token");
    let token = match &config.token_cache {
        Some(cache) => cache.get_or_acquire(provider.as_ref(), &request).await?,
        None => provider.acquire_token(&request).await?,
    };
    if token.as_bytes().is_empty() {
        return Err(AuthError::EmptyToken.into());
    }
    Ok(token.to_zeroizing_vec())
}

async fn read_response(
    stream: &mut StreamSlot,
    config: &Config,
    target: &DataSource,
) -> Result<LoginOutcome> {
    let mut response = LoginResponse::new();
    loop {
        let message = stream.read_message_of(PacketType::TabularResult).await?;
        response.apply(message.payload)?;
        if let Some(size) = response.outcome().packet_size {
            stream.set_packet_size(size as usize);
        }
        if let Some(info) = response.take_fed_auth_info() {
            let token = acquire_token(config, target, &info).await?;
            fed_auth_token_payload(&token)
                .send(stream, PacketType::FedAuthToken)
                .await?;
            tracing::debug!("access token sent");
            continue;
        }
        if response.is_done() {
            return response.finish();
        }
    }
}

/// Read the login response, answering FEDAUTHINFO when asked.
pub async fn run_response(ctx: &mut ConnectionContext) -> Result<()> {
    let target = ctx.require_data_source()?.clone();
    let budget = ctx.budget.clone();
    let config = std::sync::Arc::clone(&ctx.config);
    let stream = &mut ctx.stream;
    let outcome = budget
        .run(Stage::LoginResponse, read_response(stream, &config, &target))
        .await?;
    record_outcome(ctx, outcome)
}

/// Store a completed login, marking the handshake rerouted when the
/// server redirected it.
fn record_outcome(ctx: &mut ConnectionContext, outcome: LoginOutcome) -> Result<()> {
    if let Some(partner) = &outcome.failover_partner {
        if ctx.config.application_intent == ApplicationIntent::ReadOnly {
            return Err(Error::Failover(format!(
                "read-only application intent is not supported by a mirrored database (partner '{partner}')"
            )));
        }
    }
    if outcome.routing.is_some() {
        if let Some(prelogin) = ctx.prelogin.as_mut() {
            prelogin.status = HandshakeStatus::Rerouted;
        }
    }
    ctx.login = Some(outcome);
    Ok(())
}
