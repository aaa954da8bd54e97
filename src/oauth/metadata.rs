//! OAuth Metadata Discovery
//!
//! Implements RFC 9728 (OAuth Protected Resource Metadata) and RFC 8414
//! (OAuth Authorization Server Metadata), collapsing both into a cached
//! [`DiscoveryDocument`].

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use tracing::{debug, info};
use url::Url;

use super::storage::{Cache, CacheKey};
use crate::{Error, Result};

const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";
const AUTHORIZATION_SERVER_PATH: &str = "/.well-known/oauth-authorization-server";

/// Endpoint set of the authorization server guarding the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Authorization server issuer URL
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Dynamic client registration endpoint (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Scopes the protected resource advertises
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

/// OAuth Protected Resource Metadata (RFC 9728)
///
/// Deserialized leniently: servers in the wild use `authorization_servers`,
/// a singular `authorization_server`, or just `issuer`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    #[serde(default)]
    pub resource: Option<String>,

    /// Authorization servers that can issue tokens for this resource
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    /// Non-standard singular form
    #[serde(default)]
    pub authorization_server: Option<String>,

    /// Non-standard issuer reference
    #[serde(default)]
    pub issuer: Option<String>,

    /// Supported scopes (may be string or array due to implementation bugs)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
}

impl ProtectedResourceMetadata {
    /// The issuer to use: first non-empty of `authorization_servers`,
    /// `authorization_server`, `issuer`
    pub fn issuer(&self) -> Option<&str> {
        self.authorization_servers
            .iter()
            .map(String::as_str)
            .find(|s| !s.is_empty())
            .or_else(|| {
                self.authorization_server
                    .as_deref()
                    .filter(|s| !s.is_empty())
            })
            .or_else(|| self.issuer.as_deref().filter(|s| !s.is_empty()))
    }
}

/// OAuth Authorization Server Metadata (RFC 8414), as served
#[derive(Debug, Clone, Default, Deserialize)]
struct AuthorizationServerMetadata {
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    registration_endpoint: Option<String>,
}

/// Deserialize scopes that may be either a string or array
/// Some implementations incorrectly return `"read write"` instead of `["read", "write"]`
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match Option::<StringOrVec>::deserialize(deserializer)? {
        Some(StringOrVec::String(s)) => Ok(s.split_whitespace().map(String::from).collect()),
        Some(StringOrVec::Vec(v)) => Ok(v),
        None => Ok(Vec::new()),
    }
}

/// Resolves and caches the [`DiscoveryDocument`] for one remote endpoint
pub struct DiscoveryResolver {
    http_client: Client,
    remote_url: String,
    cache: Cache,
}

impl DiscoveryResolver {
    /// Create a resolver for `remote_url`
    pub fn new(http_client: Client, remote_url: impl Into<String>, cache: Cache) -> Self {
        Self {
            http_client,
            remote_url: remote_url.into(),
            cache,
        }
    }

    /// Return the cached document, or discover and persist it
    ///
    /// The cached document has no expiry; it is keyed by the remote URL.
    pub async fn resolve(&self) -> Result<DiscoveryDocument> {
        if let Some(doc) = self.cache.get::<DiscoveryDocument>(CacheKey::Discovery).await {
            debug!(issuer = %doc.issuer, "Using cached discovery document");
            return Ok(doc);
        }

        let doc = self.discover().await?;
        self.cache.put(CacheKey::Discovery, &doc).await;
        Ok(doc)
    }

    async fn discover(&self) -> Result<DiscoveryDocument> {
        let origin = base_url(&self.remote_url)?;
        let resource_url = format!("{origin}{PROTECTED_RESOURCE_PATH}");
        debug!(url = %resource_url, "Discovering OAuth protected resource metadata");

        let resource: ProtectedResourceMetadata =
            fetch_json(&self.http_client, &resource_url, "protected resource metadata").await?;

        let issuer = resource
            .issuer()
            .ok_or_else(|| {
                Error::Discovery(format!(
                    "Protected resource metadata at {resource_url} names no authorization server"
                ))
            })?
            .to_string();

        let metadata_url = metadata_url(&issuer)?;
        debug!(url = %metadata_url, issuer = %issuer, "Discovering OAuth authorization server metadata");

        let metadata: AuthorizationServerMetadata =
            fetch_json(&self.http_client, &metadata_url, "authorization server metadata").await?;

        let doc = into_document(metadata, &issuer, resource.scopes_supported)?;
        info!(issuer = %doc.issuer, registration = doc.registration_endpoint.is_some(), "Discovered authorization server");
        Ok(doc)
    }
}

fn into_document(
    metadata: AuthorizationServerMetadata,
    resolved_issuer: &str,
    scopes_supported: Vec<String>,
) -> Result<DiscoveryDocument> {
    let issuer = metadata
        .issuer
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| resolved_issuer.to_string());

    let authorization_endpoint = metadata
        .authorization_endpoint
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::Discovery(format!(
                "Authorization server {issuer} does not advertise an authorization_endpoint"
            ))
        })?;

    let token_endpoint = metadata
        .token_endpoint
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::Discovery(format!(
                "Authorization server {issuer} does not advertise a token_endpoint"
            ))
        })?;

    Ok(DiscoveryDocument {
        issuer,
        authorization_endpoint,
        token_endpoint,
        registration_endpoint: metadata.registration_endpoint.filter(|s| !s.is_empty()),
        scopes_supported,
    })
}

async fn fetch_json<T: DeserializeOwned>(client: &Client, url: &str, what: &str) -> Result<T> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("Failed to fetch {what} from {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Discovery(format!(
            "Fetching {what} from {url} failed: HTTP {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| Error::Discovery(format!("Failed to parse {what} from {url}: {e}")))
}

/// Authorization server metadata URL for an issuer
///
/// A path-based issuer keeps its path after the well-known segment
/// (RFC 8414 §3.1): `https://idp/tenants/acme` becomes
/// `https://idp/.well-known/oauth-authorization-server/tenants/acme`.
pub fn metadata_url(issuer: &str) -> Result<String> {
    let parsed = Url::parse(issuer)
        .map_err(|e| Error::Discovery(format!("Invalid issuer URL {issuer}: {e}")))?;

    let origin = base_url(issuer)?;
    let path = parsed.path().trim_end_matches('/');

    Ok(format!("{origin}{AUTHORIZATION_SERVER_PATH}{path}"))
}

/// Extract the base URL (scheme + host + port) from a full URL
pub fn base_url(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| Error::Discovery(format!("Invalid URL {url}: {e}")))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Discovery(format!("URL has no host: {url}")))?;

    let mut base = format!("{}://{host}", parsed.scheme());

    if let Some(port) = parsed.port() {
        use std::fmt::Write;
        let _ = write!(base, ":{port}");
    }

    Ok(base)
}
