//! Connection error types.

use std::fmt;

use thiserror::Error;

/// Server error numbers that a login may recover from by retrying.
///
/// These cover database-not-yet-available, Azure SQL throttling and
/// reconfiguration, and gateway failover states.
pub const TRANSIENT_LOGIN_ERRORS: &[i32] = &[
    4060, 4221, 10928, 10929, 40197, 40501, 40540, 40613, 42108, 42109, 49918, 49919, 49920,
];

/// Stage of the connection pipeline, used to report where a failure or
/// cancellation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Data source parsing.
    DataSource,
    /// Transport creation, including SSRP.
    Transport,
    /// TLS handshake.
    Tls,
    /// PRELOGIN exchange.
    PreLogin,
    /// LOGIN7 send.
    Login,
    /// Login response processing.
    LoginResponse,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataSource => "data source parsing",
            Self::Transport => "transport creation",
            Self::Tls => "TLS handshake",
            Self::PreLogin => "pre-login handshake",
            Self::Login => "login",
            Self::LoginResponse => "login response",
        })
    }
}

/// Why client and server could not agree on encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMismatch {
    /// The server answered NOT_SUP; the login cannot be protected.
    NotSupportedByServer,
    /// The server requires encryption and the client offered none.
    NotSupportedByClient,
    /// The client requires encryption and the server answered OFF.
    MandatoryRefused,
}

impl fmt::Display for EncryptionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotSupportedByServer => {
                "the instance of SQL Server does not support encryption"
            }
            Self::NotSupportedByClient => {
                "the instance of SQL Server requires encryption but the client disabled it"
            }
            Self::MandatoryRefused => {
                "encryption is mandatory but the server did not agree to encrypt the session"
            }
        })
    }
}

/// Errors that can occur while establishing a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The data source string could not be parsed.
    #[error("invalid data source '{data_source}': {reason}")]
    DataSource {
        /// Input as given.
        data_source: String,
        /// What was wrong.
        reason: String,
    },

    /// Protocol error: the server sent bytes this client cannot accept.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_protocol::ProtocolError),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] mssql_codec::CodecError),

    /// Client and server disagree on encryption.
    #[error("encryption negotiation failed: {0}")]
    Encryption(EncryptionMismatch),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] mssql_tls::TlsError),

    /// Authentication setup failed.
    #[error("authentication failed: {0}")]
    Authentication(#[from] mssql_auth::AuthError),

    /// The attempt was cancelled.
    #[error("operation cancelled during {stage}")]
    Cancelled {
        /// Stage that was interrupted.
        stage: Stage,
    },

    /// The connect timeout budget was exhausted.
    #[error("connection timeout expired")]
    ConnectionTimeout,

    /// Instance name resolution over SSRP failed.
    #[error("SQL Server Resolution Protocol lookup for '{instance}' on {server} failed: {reason}")]
    Ssrp {
        /// Server asked.
        server: String,
        /// Instance asked for.
        instance: String,
        /// What went wrong.
        reason: String,
    },

    /// The server is not the instance that was asked for.
    #[error("connected to the wrong SQL Server instance (requested '{instance}')")]
    InstanceMismatch {
        /// Instance that was requested.
        instance: String,
    },

    /// No transport accepted the data source.
    #[error("no transport can handle this data source: {0}")]
    NoSuitableTransport(String),

    /// Several handlers failed.
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<Error>),

    /// The server redirected the connection and redirects are disabled.
    #[error("routing required to {host}:{port}")]
    Routing {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    /// The redirect chain is longer than allowed.
    #[error("Too many redirections have occurred.")]
    TooManyRedirects {
        /// Maximum redirects allowed.
        max: u8,
    },

    /// Server returned an error.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error class/severity (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where error occurred.
        server: Option<String>,
        /// Stored procedure name (if applicable).
        procedure: Option<String>,
        /// Line number.
        line: u32,
    },

    /// The failover partner setup cannot be used.
    #[error("failover error: {0}")]
    Failover(String),

    /// The login failed without an explanatory error token.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// A pipeline precondition was not met.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// Transient errors cover unreachable or dropped transports, expired
    /// attempt deadlines and the server numbers in [`TRANSIENT_LOGIN_ERRORS`].
    /// They drive the connect-retry policy, the return to the gateway after
    /// a redirect and the switch to a failover partner.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionTimeout | Self::Io(_) => true,
            Self::Codec(e) => e.is_io(),
            Self::Tls(e) => e.is_transient(),
            Self::Server { number, .. } => TRANSIENT_LOGIN_ERRORS.contains(number),
            Self::Aggregate(errors) => errors.iter().all(Self::is_transient),
            _ => false,
        }
    }

    /// Check if this error must never be retried.
    ///
    /// Parse errors, protocol desync, encryption mismatches, cancellation
    /// and redirect loops are terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DataSource { .. }
                | Self::Protocol(_)
                | Self::Encryption(_)
                | Self::Cancelled { .. }
                | Self::TooManyRedirects { .. }
                | Self::Failover(_)
                | Self::InvalidArgument(_)
                | Self::Config(_)
        )
    }

    /// Check if this error indicates a protocol/driver bug.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Codec(mssql_codec::CodecError::Protocol(_))
        )
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Get the error class/severity if this is a server error.
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub(crate) fn data_source(data_source: &str, reason: impl Into<String>) -> Self {
        Self::DataSource {
            data_source: data_source.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<tds_protocol::ServerMessage> for Error {
    fn from(err: tds_protocol::ServerMessage) -> Self {
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        Self::Server {
            number: err.number,
            class: err.class,
            state: err.state,
            line: err.line.max(0) as u32,
            message: err.message,
            server: non_empty(err.server),
            procedure: non_empty(err.procedure),
        }
    }
}

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, Error>;
