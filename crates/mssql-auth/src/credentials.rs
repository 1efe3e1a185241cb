//! Credential types.

use std::fmt;

use zeroize::Zeroize;

/// Secrets supplied by the caller.
#[derive(Clone)]
#[non_exhaustive]
pub enum Credentials {
    /// No secrets: integrated authentication or a token callback.
    None,

    /// User name and password, used by SQL authentication and by the
    /// Entra ID password flow.
    UserPassword {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },

    /// A pre-acquired access token.
    AccessToken {
        /// Token bytes.
        token: Vec<u8>,
    },
}

impl Credentials {
    /// User name and password.
    pub fn user_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UserPassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// A pre-acquired access token, as UTF-8 bytes.
    pub fn access_token(token: impl Into<String>) -> Self {
        Self::AccessToken {
            token: token.into().into_bytes(),
        }
    }

    /// User name, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::UserPassword { username, .. } => Some(username),
            _ => None,
        }
    }

    /// Whether an access token is carried.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        matches!(self, Self::AccessToken { .. })
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::None
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        match self {
            Self::None => {}
            Self::UserPassword { password, .. } => password.zeroize(),
            Self::AccessToken { token } => token.zeroize(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::AccessToken { token } => f
                .debug_struct("AccessToken")
                .field("token", &"[REDACTED]")
                .field("len", &token.len())
                .finish(),
        }
    }
}
