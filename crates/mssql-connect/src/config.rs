//! Connection configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mssql_auth::{
    AccessToken, AccessTokenProvider, AuthMethod, Credentials, SspiProvider, TokenProviderCache,
};
use mssql_tls::TlsConfig;
use tds_protocol::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, TdsVersion};
use zeroize::Zeroizing;

use crate::error::Error;
use crate::transport::ssrp::SSRP_PORT;

/// Encryption policy for the connection.
///
/// The variants map onto what the client offers in PRELOGIN. `LoginOnly`
/// is the legacy default: the login record is always encrypted and the
/// server decides whether the rest of the session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptMode {
    /// The client offers no encryption. The login is sent in plaintext if
    /// the server permits it.
    Off,
    /// Encrypt at least the login; the server may upgrade to full encryption.
    #[default]
    LoginOnly,
    /// Encrypt the whole session; a server that refuses is an error.
    Mandatory,
    /// TLS before any TDS traffic (TDS 8.0), with certificate validation.
    Strict,
}

impl EncryptMode {
    /// Whether TLS runs before PRELOGIN.
    #[must_use]
    pub fn is_tls_first(self) -> bool {
        self == Self::Strict
    }

    /// TDS version requested in LOGIN7.
    #[must_use]
    pub fn tds_version(self) -> TdsVersion {
        if self.is_tls_first() {
            TdsVersion::V8_0
        } else {
            TdsVersion::V7_4
        }
    }
}

/// Declared workload of the connection, used by availability group routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplicationIntent {
    /// Read-write workload.
    #[default]
    ReadWrite,
    /// Read-only workload; may be routed to a readable secondary.
    ReadOnly,
}

/// Configuration for server-directed redirects.
///
/// Azure SQL gateways and availability group listeners may answer a login
/// with a routing ENVCHANGE pointing at a different server.
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Maximum number of redirects followed (default: 10).
    pub max_redirects: u8,
    /// Whether to follow redirects automatically (default: true).
    pub follow_redirects: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            follow_redirects: true,
        }
    }
}

impl RedirectConfig {
    /// Create a new redirect configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of redirects.
    #[must_use]
    pub fn max_redirects(mut self, max: u8) -> Self {
        self.max_redirects = max;
        self
    }

    /// Enable or disable automatic redirect following.
    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Disable redirect following.
    ///
    /// A routing response then surfaces as [`Error::Routing`].
    #[must_use]
    pub fn no_follow() -> Self {
        Self {
            max_redirects: 0,
            follow_redirects: false,
        }
    }
}

/// Connect-retry policy: a fixed number of extra attempts separated by a
/// fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u8,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Disable retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            interval: Duration::ZERO,
        }
    }

    /// Check if more retries are allowed after `attempt` retries.
    #[must_use]
    pub fn should_retry(&self, attempt: u8) -> bool {
        attempt < self.max_retries
    }
}

/// Configuration for connecting to SQL Server.
///
/// Marked `#[non_exhaustive]`; build it with [`Config::new`] and the
/// builder methods.
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// Data source, e.g. `tcp:server,1433`, `server\instance`,
    /// `np:\\host\pipe\sql\query` or `(localdb)\MSSQLLocalDB`.
    pub data_source: String,

    /// Encryption policy.
    pub encrypt: EncryptMode,

    /// Skip certificate validation (ignored in strict mode).
    pub trust_server_certificate: bool,

    /// Host name expected in the server certificate.
    pub host_name_in_certificate: Option<String>,

    /// Declared workload.
    pub application_intent: ApplicationIntent,

    /// Authentication method.
    pub authentication: AuthMethod,

    /// User name and password, or an access token.
    pub credentials: Credentials,

    /// Pre-acquired access token.
    pub access_token: Option<AccessToken>,

    /// Callback producing access tokens for federated authentication.
    pub access_token_callback: Option<Arc<dyn AccessTokenProvider>>,

    /// Cache shared by connections that use the same token callback.
    pub token_cache: Option<Arc<TokenProviderCache>>,

    /// Security package used for integrated authentication.
    pub sspi_provider: Option<Arc<dyn SspiProvider>>,

    /// Initial database.
    pub database: Option<String>,

    /// Application name (shown in SQL Server management tools).
    pub application_name: String,

    /// Client machine name sent in LOGIN7. Defaults to the local host name.
    pub workstation_id: Option<String>,

    /// Initial language.
    pub language: Option<String>,

    /// Database file to attach on login.
    pub attach_db_filename: Option<String>,

    /// Replacement password for the password-change flow.
    pub new_password: Option<Zeroizing<String>>,

    /// Requested TDS packet size.
    pub packet_size: u16,

    /// Request Multiple Active Result Sets.
    pub mars: bool,

    /// Budget for the whole connect, across all stages and redirects.
    pub connect_timeout: Duration,

    /// Extra attempts after a transient failure (default: 1).
    /// Zero also disables returning to the gateway after a redirect.
    pub connect_retry_count: u8,

    /// Pause between connect attempts (default: 10s).
    pub connect_retry_interval: Duration,

    /// Redirect handling.
    pub redirect: RedirectConfig,

    /// Mirroring partner tried when the primary is unreachable.
    pub failover_partner: Option<String>,

    /// Attach a user instance.
    pub user_instance: bool,

    /// UDP port of the SQL Server Browser used for instance lookups.
    pub browser_port: u16,

    /// TLS settings. Encryption flags above are applied on top.
    pub tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_source: String::new(),
            encrypt: EncryptMode::default(),
            trust_server_certificate: false,
            host_name_in_certificate: None,
            application_intent: ApplicationIntent::default(),
            authentication: AuthMethod::default(),
            credentials: Credentials::default(),
            access_token: None,
            access_token_callback: None,
            token_cache: None,
            sspi_provider: None,
            database: None,
            application_name: "mssql-connect".to_string(),
            workstation_id: None,
            language: None,
            attach_db_filename: None,
            new_password: None,
            packet_size: DEFAULT_PACKET_SIZE as u16,
            mars: false,
            connect_timeout: Duration::from_secs(15),
            connect_retry_count: 1,
            connect_retry_interval: Duration::from_secs(10),
            redirect: RedirectConfig::default(),
            failover_partner: None,
            user_instance: false,
            browser_port: SSRP_PORT,
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data source.
    #[must_use]
    pub fn data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = data_source.into();
        self
    }

    /// Set the encryption policy.
    #[must_use]
    pub fn encrypt(mut self, mode: EncryptMode) -> Self {
        self.encrypt = mode;
        self
    }

    /// Trust the server certificate without validation.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Override the host name matched against the server certificate.
    #[must_use]
    pub fn host_name_in_certificate(mut self, name: impl Into<String>) -> Self {
        self.host_name_in_certificate = Some(name.into());
        self
    }

    /// Set the application intent.
    #[must_use]
    pub fn application_intent(mut self, intent: ApplicationIntent) -> Self {
        self.application_intent = intent;
        self
    }

    /// Set the authentication method.
    #[must_use]
    pub fn authentication(mut self, method: AuthMethod) -> Self {
        self.authentication = method;
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Use a pre-acquired access token.
    #[must_use]
    pub fn access_token(mut self, token: AccessToken) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Acquire access tokens through `provider`.
    #[must_use]
    pub fn access_token_callback(mut self, provider: Arc<dyn AccessTokenProvider>) -> Self {
        self.access_token_callback = Some(provider);
        self
    }

    /// Share a token cache across connections.
    #[must_use]
    pub fn token_cache(mut self, cache: Arc<TokenProviderCache>) -> Self {
        self.token_cache = Some(cache);
        self
    }

    /// Set the SSPI provider used for integrated authentication.
    #[must_use]
    pub fn sspi_provider(mut self, provider: Arc<dyn SspiProvider>) -> Self {
        self.sspi_provider = Some(provider);
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the workstation id.
    #[must_use]
    pub fn workstation_id(mut self, id: impl Into<String>) -> Self {
        self.workstation_id = Some(id.into());
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Attach a database file on login.
    #[must_use]
    pub fn attach_db_filename(mut self, path: impl Into<String>) -> Self {
        self.attach_db_filename = Some(path.into());
        self
    }

    /// Change the password as part of the login.
    #[must_use]
    pub fn new_password(mut self, password: impl Into<String>) -> Self {
        self.new_password = Some(Zeroizing::new(password.into()));
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size;
        self
    }

    /// Request MARS.
    #[must_use]
    pub fn mars(mut self, enabled: bool) -> Self {
        self.mars = enabled;
        self
    }

    /// Set the connect timeout budget.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the number of connect retries.
    #[must_use]
    pub fn connect_retry_count(mut self, count: u8) -> Self {
        self.connect_retry_count = count;
        self
    }

    /// Set the pause between connect retries.
    #[must_use]
    pub fn connect_retry_interval(mut self, interval: Duration) -> Self {
        self.connect_retry_interval = interval;
        self
    }

    /// Set the redirect handling configuration.
    #[must_use]
    pub fn redirect(mut self, redirect: RedirectConfig) -> Self {
        self.redirect = redirect;
        self
    }

    /// Set the maximum number of redirects.
    #[must_use]
    pub fn max_redirects(mut self, max: u8) -> Self {
        self.redirect.max_redirects = max;
        self
    }

    /// Set the database mirroring failover partner.
    ///
    /// Requires [`Config::database`]; connection attempts alternate between
    /// the data source and the partner until the connect timeout expires.
    #[must_use]
    pub fn failover_partner(mut self, partner: impl Into<String>) -> Self {
        self.failover_partner = Some(partner.into());
        self
    }

    /// Attach a user instance.
    #[must_use]
    pub fn user_instance(mut self, enabled: bool) -> Self {
        self.user_instance = enabled;
        self
    }

    /// Set the SQL Server Browser port.
    #[must_use]
    pub fn browser_port(mut self, port: u16) -> Self {
        self.browser_port = port;
        self
    }

    /// Replace the TLS settings.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Connect-retry policy derived from the retry count and interval.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.connect_retry_count,
            interval: self.connect_retry_interval,
        }
    }

    /// TLS settings with the encryption policy applied.
    ///
    /// Strict mode always validates the certificate.
    #[must_use]
    pub fn effective_tls(&self) -> TlsConfig {
        let mut tls = self
            .tls
            .clone()
            .strict_mode(self.encrypt.is_tls_first())
            .trust_server_certificate(self.trust_server_certificate || self.tls.trust_server_certificate);
        if let Some(name) = &self.host_name_in_certificate {
            tls = tls.with_host_name_in_certificate(name.clone());
        }
        tls
    }

    /// Whether federated authentication is requested in LOGIN7.
    #[must_use]
    pub fn uses_federated_auth(&self) -> bool {
        self.authentication.is_active_directory()
            || self.access_token.is_some()
            || self.access_token_callback.is_some()
            || self.credentials.has_access_token()
    }

    /// Whether the server's FEDAUTHREQUIRED answer should be honored.
    #[must_use]
    pub fn trusts_fed_auth_required(&self) -> bool {
        self.authentication != AuthMethod::NotSpecified
            || self.access_token.is_some()
            || self.access_token_callback.is_some()
            || self.credentials.has_access_token()
    }

    /// Check settings that can be rejected before any I/O.
    pub fn validate(&self) -> Result<(), Error> {
        if self.data_source.trim().is_empty() {
            return Err(Error::Config("data source is empty".into()));
        }
        let packet_size = usize::from(self.packet_size);
        if !(512..=MAX_PACKET_SIZE).contains(&packet_size) {
            return Err(Error::Config(format!(
                "packet size {packet_size} outside 512..={MAX_PACKET_SIZE}"
            )));
        }
        let has_token = self.access_token.is_some() || self.credentials.has_access_token();
        if has_token && self.access_token_callback.is_some() {
            return Err(Error::Config(
                "an access token and an access token callback cannot both be set".into(),
            ));
        }
        if has_token && self.credentials.username().is_some() {
            return Err(Error::Config(
                "an access token cannot be combined with a user name and password".into(),
            ));
        }
        if self.authentication.is_active_directory()
            && !has_token
            && self.access_token_callback.is_none()
        {
            return Err(Error::Config(format!(
                "{} authentication requires an access token or an access token callback",
                self.authentication
            )));
        }
        if self.authentication.is_sspi() && self.sspi_provider.is_none() {
            return Err(Error::Config(
                "integrated authentication requires an SSPI provider".into(),
            ));
        }
        if let Some(partner) = &self.failover_partner {
            if partner.trim().is_empty() {
                return Err(Error::Config("failover partner is empty".into()));
            }
            if self.database.as_deref().is_none_or(str::is_empty) {
                return Err(Error::Config(
                    "a failover partner requires an initial database".into(),
                ));
            }
            if self.application_intent == ApplicationIntent::ReadOnly {
                return Err(Error::Config(
                    "a failover partner cannot be combined with read-only application intent".into(),
                ));
            }
            if self.user_instance {
                return Err(Error::Config(
                    "a failover partner cannot be combined with a user instance".into(),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("data_source", &self.data_source)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("application_intent", &self.application_intent)
            .field("authentication", &self.authentication)
            .field("credentials", &self.credentials)
            .field("access_token", &self.access_token)
            .field("access_token_callback", &self.access_token_callback.is_some())
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("packet_size", &self.packet_size)
            .field("mars", &self.mars)
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_retry_count", &self.connect_retry_count)
            .field("connect_retry_interval", &self.connect_retry_interval)
            .field("redirect", &self.redirect)
            .field("failover_partner", &self.failover_partner)
            .finish_non_exhaustive()
    }
}
