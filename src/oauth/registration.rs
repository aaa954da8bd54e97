//! Dynamic Client Registration (RFC 7591)
//!
//! The relay is a public native client: no secret, PKCE only. A client
//! identity is registered once per issuer and reused from the cache.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::metadata::DiscoveryDocument;
use super::storage::{Cache, CacheKey};
use crate::{Error, Result};

/// Registered OAuth client identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// Issuer the client was registered with
    pub issuer: String,

    /// Client ID
    pub client_id: String,

    /// Registered redirect URIs
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl ClientRegistration {
    /// Whether this registration can be used against `doc` with `redirect_uri`
    pub fn matches(&self, doc: &DiscoveryDocument, redirect_uri: &str) -> bool {
        self.issuer == doc.issuer
            && self
                .redirect_uris
                .iter()
                .any(|u| same_redirect_uri(u, redirect_uri))
    }
}

/// Compare redirect URIs after URL parsing, falling back to exact text
fn same_redirect_uri(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Client registration response
#[derive(Debug, Deserialize)]
struct ClientRegistrationResponse {
    client_id: String,
    #[serde(default)]
    redirect_uris: Option<Vec<String>>,
}

/// Obtains or reuses the relay's OAuth client identity
pub struct ClientRegistrar {
    http_client: Client,
    cache: Cache,
    client_name: String,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl ClientRegistrar {
    /// Create a registrar
    ///
    /// `scopes` are the configured scopes; when empty the resource's
    /// advertised scopes are requested instead.
    pub fn new(
        http_client: Client,
        cache: Cache,
        client_name: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http_client,
            cache,
            client_name: client_name.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
        }
    }

    /// Return a registration valid for `doc`, registering if necessary
    pub async fn ensure_client(&self, doc: &DiscoveryDocument) -> Result<ClientRegistration> {
        if let Some(client) = self.cache.get::<ClientRegistration>(CacheKey::Client).await {
            if client.matches(doc, &self.redirect_uri) {
                debug!(client_id = %client.client_id, "Using cached client registration");
                return Ok(client);
            }
            info!(
                cached_issuer = %client.issuer,
                issuer = %doc.issuer,
                "Cached client registration does not match, re-registering"
            );
        }

        let endpoint = doc.registration_endpoint.as_deref().ok_or_else(|| {
            Error::Registration(format!(
                "Authorization server {} advertises no registration_endpoint and no registered client is cached",
                doc.issuer
            ))
        })?;

        let client = self.register(doc, endpoint).await?;
        self.cache.put(CacheKey::Client, &client).await;
        Ok(client)
    }

    async fn register(&self, doc: &DiscoveryDocument, endpoint: &str) -> Result<ClientRegistration> {
        let mut body = serde_json::json!({
            "client_name": self.client_name,
            "application_type": "native",
            "redirect_uris": [self.redirect_uri],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none"
        });

        if let Some(scope) = requested_scope(&self.scopes, doc) {
            body["scope"] = serde_json::Value::String(scope);
        }

        let response = self
            .http_client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Registration(format!("Client registration request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registration(format!(
                "Client registration failed: HTTP {status} - {body}"
            )));
        }

        let reg_response: ClientRegistrationResponse = response.json().await.map_err(|e| {
            Error::Registration(format!("Failed to parse registration response: {e}"))
        })?;

        info!(client_id = %reg_response.client_id, issuer = %doc.issuer, "Registered OAuth client");

        // Keep the URI we asked for next to whatever form the server echoed
        let mut redirect_uris = reg_response.redirect_uris.unwrap_or_default();
        if !redirect_uris
            .iter()
            .any(|u| same_redirect_uri(u, &self.redirect_uri))
        {
            redirect_uris.push(self.redirect_uri.clone());
        }

        Ok(ClientRegistration {
            issuer: doc.issuer.clone(),
            client_id: reg_response.client_id,
            redirect_uris,
        })
    }
}

/// Space-joined scope to request: configured scopes win over advertised ones
pub fn requested_scope(configured: &[String], doc: &DiscoveryDocument) -> Option<String> {
    let scopes = if configured.is_empty() {
        &doc.scopes_supported
    } else {
        configured
    };

    (!scopes.is_empty()).then(|| scopes.join(" "))
}
