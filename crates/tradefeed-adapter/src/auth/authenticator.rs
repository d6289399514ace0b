/*
[INPUT]:  Token store or fixed tokens
[OUTPUT]: "Produce current auth material or fail" capability for sessions
[POS]:    Auth layer - boundary between credential handling and the session
[UPDATE]: When adding credential sources
*/

use async_trait::async_trait;
use tracing::warn;

use super::{AuthTokens, TokenStore};

/// Supplies valid credentials on demand.
///
/// Login and refresh flows live behind this trait; the session only asks
/// whether material is valid and reads it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Make sure credentials are usable, refreshing out of band if needed.
    async fn ensure_valid(&self) -> bool;

    /// Current credentials, if any.
    fn current_credentials(&self) -> Option<AuthTokens>;
}

#[async_trait]
impl Authenticator for TokenStore {
    async fn ensure_valid(&self) -> bool {
        if self.tokens().is_none() {
            warn!("no authentication tokens stored");
            return false;
        }
        if self.is_expired() {
            warn!("authentication tokens expired, re-login required");
            return false;
        }
        if self.needs_refresh() {
            warn!("authentication tokens close to expiry, refresh recommended");
        }
        true
    }

    fn current_credentials(&self) -> Option<AuthTokens> {
        self.tokens()
    }
}

/// Fixed credentials that are always considered valid
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    tokens: AuthTokens,
}

impl StaticAuthenticator {
    pub fn new(tokens: AuthTokens) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn ensure_valid(&self) -> bool {
        true
    }

    fn current_credentials(&self) -> Option<AuthTokens> {
        Some(self.tokens.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_store_authenticator() {
        let store = TokenStore::new();
        assert!(!store.ensure_valid().await);
        assert!(store.current_credentials().is_none());

        store.set_tokens(AuthTokens::new("access", "refresh"), 3600);
        assert!(store.ensure_valid().await);
        assert_eq!(
            store.current_credentials().map(|t| t.access_token),
            Some("access".to_string())
        );

        store.set_tokens(AuthTokens::new("access", "refresh"), 10);
        assert!(!store.ensure_valid().await);
    }

    #[tokio::test]
    async fn test_static_authenticator_always_valid() {
        let auth = StaticAuthenticator::new(AuthTokens::new("a", "r"));
        assert!(auth.ensure_valid().await);
        assert_eq!(auth.current_credentials(), Some(AuthTokens::new("a", "r")));
    }
}
