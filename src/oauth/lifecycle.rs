//! Token Lifecycle Manager
//!
//! Decides between reusing the cached token, refreshing it silently, and
//! running the interactive login. The cache is re-read on every decision.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::AuthorizationFlow;
use super::metadata::DiscoveryDocument;
use super::registration::ClientRegistration;
use super::storage::{Cache, CacheKey, TokenRecord, unix_now};
use crate::Result;

/// A cached token is reused only if it outlives now by more than this
pub const REUSE_LEEWAY_SECS: u64 = 60;

/// Hands out valid access tokens
pub struct TokenManager {
    cache: Cache,
    flow: Arc<AuthorizationFlow>,
    /// Serializes refreshes and logins across concurrent requests
    renew_lock: Mutex<()>,
}

impl TokenManager {
    /// Create a token manager
    pub fn new(cache: Cache, flow: Arc<AuthorizationFlow>) -> Self {
        Self {
            cache,
            flow,
            renew_lock: Mutex::new(()),
        }
    }

    /// Return a valid token: cached, refreshed, or freshly authorized
    pub async fn ensure_token(
        &self,
        doc: &DiscoveryDocument,
        client: &ClientRegistration,
    ) -> Result<TokenRecord> {
        if let Some(token) = self.fresh_cached().await {
            return Ok(token);
        }

        let _renewing = self.renew_lock.lock().await;

        // Whoever held the lock before us may already have renewed
        let cached = self.cache.get::<TokenRecord>(CacheKey::Tokens).await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(unix_now(), REUSE_LEEWAY_SECS)) {
            debug!("Token renewed by a concurrent request");
            return Ok(token.clone());
        }

        if let Some(refresh_token) = cached.and_then(|t| t.refresh_token) {
            match self.flow.refresh(doc, client, &refresh_token).await {
                Ok(token) => return Ok(token),
                Err(e) => warn!(error = %e, "Token refresh failed, falling back to interactive login"),
            }
        }

        info!(issuer = %doc.issuer, "Interactive login required");
        self.flow.authorize(doc, client).await
    }

    /// Mark `rejected` as expired so the next `ensure_token` renews it
    ///
    /// Leaves the cache alone if it already holds a different token.
    pub async fn invalidate(&self, rejected: &TokenRecord) {
        let _renewing = self.renew_lock.lock().await;

        let Some(mut cached) = self.cache.get::<TokenRecord>(CacheKey::Tokens).await else {
            return;
        };
        if cached.access_token != rejected.access_token {
            debug!("Rejected token already replaced");
            return;
        }

        cached.expires_at = 0;
        self.cache.put(CacheKey::Tokens, &cached).await;
        debug!("Cached token invalidated");
    }

    async fn fresh_cached(&self) -> Option<TokenRecord> {
        let token = self.cache.get::<TokenRecord>(CacheKey::Tokens).await?;
        if token.is_fresh(unix_now(), REUSE_LEEWAY_SECS) {
            debug!(expires_at = token.expires_at, "Using cached token");
            Some(token)
        } else {
            debug!(expires_at = token.expires_at, "Cached token is stale");
            None
        }
    }
}
