/*
[INPUT]:  Access/refresh token pair and expiration timestamps
[OUTPUT]: Token retrieval, expiry and refresh-due status
[POS]:    Auth layer - token lifecycle management
[UPDATE]: When changing expiry buffers or storage strategy
*/

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

use crate::config::CookieNames;

/// Tokens are treated as expired this long before their real expiry
const EXPIRED_BUFFER_SECS: i64 = 300;
/// A refresh is due this long before expiry
const REFRESH_BUFFER_SECS: i64 = 900;

/// Access/refresh token pair presented during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Cookie header value, e.g. `auth-access-token=..; auth-refresh-token=..`
    pub fn cookie_header(&self, names: &CookieNames) -> String {
        format!(
            "{}={}; {}={}",
            names.access, self.access_token, names.refresh, self.refresh_token
        )
    }
}

/// Stored tokens with metadata
#[derive(Debug, Clone)]
pub struct TokenData {
    pub tokens: AuthTokens,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Thread-safe token store
#[derive(Debug, Clone)]
pub struct TokenStore {
    data: Arc<RwLock<Option<TokenData>>>,
}

impl TokenStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(None)),
        }
    }

    /// Store a new token pair valid for `expires_seconds`
    pub fn set_tokens(&self, tokens: AuthTokens, expires_seconds: u64) {
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::seconds(expires_seconds as i64);
        self.set_token_data(TokenData {
            tokens,
            issued_at,
            expires_at,
        });
    }

    /// Store tokens with explicit timestamps (e.g. loaded from disk by the caller)
    pub fn set_token_data(&self, data: TokenData) {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(data);
    }

    /// Get the current tokens if available
    pub fn tokens(&self) -> Option<AuthTokens> {
        let guard = self.data.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|data| data.tokens.clone())
    }

    /// Check if tokens are missing or inside the expiry buffer
    pub fn is_expired(&self) -> bool {
        self.expires_within(EXPIRED_BUFFER_SECS)
    }

    /// Check if tokens should be refreshed soon
    pub fn needs_refresh(&self) -> bool {
        self.expires_within(REFRESH_BUFFER_SECS)
    }

    /// Get token data if available
    pub fn token_data(&self) -> Option<TokenData> {
        let guard = self.data.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Clear the stored tokens
    pub fn clear(&self) {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    fn expires_within(&self, buffer_secs: i64) -> bool {
        let guard = self.data.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(data) => Utc::now() >= data.expires_at - Duration::seconds(buffer_secs),
            None => true,
        }
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_is_empty() {
        let store = TokenStore::new();
        assert!(store.tokens().is_none());
        assert!(store.is_expired());
        assert!(store.needs_refresh());
    }

    #[test]
    fn test_set_and_get_tokens() {
        let store = TokenStore::new();
        store.set_tokens(AuthTokens::new("access", "refresh"), 3600);

        assert_eq!(store.tokens(), Some(AuthTokens::new("access", "refresh")));
        assert!(!store.is_expired());
        assert!(!store.needs_refresh());
    }

    #[test]
    fn test_expiry_buffers() {
        let store = TokenStore::new();
        // Inside the refresh window but outside the expiry buffer.
        store.set_tokens(AuthTokens::new("access", "refresh"), 600);
        assert!(!store.is_expired());
        assert!(store.needs_refresh());

        store.set_tokens(AuthTokens::new("access", "refresh"), 120);
        assert!(store.is_expired());
    }

    #[test]
    fn test_clear_tokens() {
        let store = TokenStore::new();
        store.set_tokens(AuthTokens::new("access", "refresh"), 3600);

        store.clear();
        assert!(store.tokens().is_none());
        assert!(store.is_expired());
    }

    #[test]
    fn test_cookie_header_format() {
        let tokens = AuthTokens::new("a1", "r1");
        assert_eq!(
            tokens.cookie_header(&CookieNames::default()),
            "auth-access-token=a1; auth-refresh-token=r1"
        );
    }
}
