//! Token cache shared by connection attempts.
//!
//! Keyed by `(method, server, user)`. A lookup takes the lock, returns a
//! live token if one is cached, otherwise releases the lock while the
//! provider runs, then re-checks before inserting so concurrent attempts
//! keep the first token stored.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::AuthError;
use crate::provider::{AccessToken, AccessTokenProvider, AuthMethod, TokenRequest};

/// Tokens are refreshed this long before their expiry.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    method: AuthMethod,
    server: String,
    user: Option<String>,
}

impl CacheKey {
    fn from_request(request: &TokenRequest) -> Self {
        Self {
            method: request.method,
            server: request.server.to_ascii_lowercase(),
            user: request.user.clone(),
        }
    }
}

/// Caches access tokens between connection attempts.
///
/// An explicit service object: create one and share it (for example through
/// an `Arc`) between the configurations that should reuse tokens.
#[derive(Debug)]
pub struct TokenProviderCache {
    entries: Mutex<HashMap<CacheKey, AccessToken>>,
    refresh_margin: Duration,
}

impl TokenProviderCache {
    /// An empty cache using [`DEFAULT_REFRESH_MARGIN`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    /// Change how early tokens are refreshed.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Cached token for `request`, or a fresh one from `provider`.
    pub async fn get_or_acquire(
        &self,
        provider: &dyn AccessTokenProvider,
        request: &TokenRequest,
    ) -> Result<AccessToken, AuthError> {
        let key = CacheKey::from_request(request);
        if let Some(token) = self.lookup(&key) {
            tracing::debug!(method = %request.method, server = %request.server, "access token cache hit");
            return Ok(token);
        }

        let acquired = provider.acquire_token(request).await?;
        if acquired.as_bytes().is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            if self.is_fresh(existing) {
                return Ok(existing.clone());
            }
        }
        tracing::debug!(method = %request.method, server = %request.server, "access token cached");
        entries.insert(key, acquired.clone());
        Ok(acquired)
    }

    /// Drop every cached token.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &CacheKey) -> Option<AccessToken> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(token) if self.is_fresh(token) => Some(token.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn is_fresh(&self, token: &AccessToken) -> bool {
        token.is_valid_at(Instant::now() + self.refresh_margin)
    }
}

impl Default for TokenProviderCache {
    fn default() -> Self {
        Self::new()
    }
}
