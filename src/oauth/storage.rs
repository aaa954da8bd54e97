//! OAuth State Storage
//!
//! A small key-value cache of JSON records (discovery document, client
//! registration, token record) that survives relay restarts. Absence and
//! corruption are treated the same way: the caller re-derives the record.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Seconds shaved off the declared token lifetime
pub const EXPIRY_SAFETY_MARGIN_SECS: u64 = 30;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Persisted OAuth access credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Access token
    pub access_token: String,

    /// Refresh token (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Conservative expiry (Unix timestamp)
    pub expires_at: u64,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenRecord {
    /// Build a record from a token endpoint response issued at `issued_at`
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
        scope: Option<String>,
        issued_at: u64,
    ) -> Self {
        let lifetime = expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Self {
            access_token,
            refresh_token,
            expires_at: issued_at
                .saturating_add(lifetime)
                .saturating_sub(EXPIRY_SAFETY_MARGIN_SECS),
            scope,
        }
    }

    /// Whether the token is still usable for at least `leeway_secs` after `now`
    pub fn is_fresh(&self, now: u64, leeway_secs: u64) -> bool {
        self.expires_at > now.saturating_add(leeway_secs)
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// The named records kept per remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    /// Resolved discovery document
    Discovery,
    /// Dynamic client registration
    Client,
    /// Token record
    Tokens,
}

impl CacheKey {
    /// Record name used in the backing store
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Client => "client",
            Self::Tokens => "tokens",
        }
    }
}

/// Durable storage of whole JSON records
///
/// `put` replaces the record entirely; `get` returns `None` for anything
/// missing or unreadable.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a record
    async fn get(&self, key: &str) -> Option<Value>;

    /// Replace a record
    async fn put(&self, key: &str, value: &Value) -> Result<()>;
}

/// One JSON file per record under a base directory
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a new file store, creating the directory if needed
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            std::fs::create_dir_all(&base_dir).map_err(|e| {
                Error::Config(format!(
                    "Failed to create cache dir {}: {e}",
                    base_dir.display()
                ))
            })?;
        }

        Ok(Self { base_dir })
    }

    /// Create a file store in the default location (~/.mcp-oauth-relay)
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;

        Self::new(home.join(".mcp-oauth-relay"))
    }

    /// Base directory of the store
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, "No cached record");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached record");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unparsable cached record");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self
            .base_dir
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let content = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, content).await?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&tmp, perms).await;
        }

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key = %key, "Stored record");
        Ok(())
    }
}

/// In-process store, lost on exit
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, Value>,
}

impl MemoryStore {
    /// Create an empty memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.records.get(key).map(|v| v.value().clone())
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.records.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Typed view of a store, scoped to one remote endpoint
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl Cache {
    /// Create a cache over `store` for records of `namespace`
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Create a cache namespaced by the remote endpoint URL
    pub fn for_remote(store: Arc<dyn KeyValueStore>, remote_url: &str) -> Self {
        Self::new(store, namespace_for(remote_url))
    }

    /// Namespace of this cache
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, key: CacheKey) -> String {
        format!("{}_{}", self.namespace, key.as_str())
    }

    /// Read and decode a record; undecodable records count as absent
    pub async fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let value = self.store.get(&self.key(key)).await?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Cached record has unexpected shape");
                None
            }
        }
    }

    /// Encode and store a record
    ///
    /// A failed write is logged, not returned.
    pub async fn put<T: Serialize>(&self, key: CacheKey, record: &T) {
        let value = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Failed to encode record");
                return;
            }
        };

        if let Err(e) = self.store.put(&self.key(key), &value).await {
            warn!(key = key.as_str(), error = %e, "Failed to persist record");
        }
    }
}

/// Stable storage namespace for a remote endpoint URL
pub fn namespace_for(remote_url: &str) -> String {
    let hash = Sha256::digest(remote_url.as_bytes());
    hex::encode(hash)[..16].to_string()
}
