//! Authorization Flow Engine
//!
//! Runs the interactive authorization code + PKCE login and the silent
//! refresh grant. Every successful exchange is persisted as the new
//! [`TokenRecord`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::callback::CallbackServer;
use super::metadata::DiscoveryDocument;
use super::pkce::PkceChallenge;
use super::registration::{ClientRegistration, requested_scope};
use super::storage::{Cache, CacheKey, TokenRecord, unix_now};
use crate::browser::UrlOpener;
use crate::{Error, Result};

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Fixed parameters of the login flow
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Redirect URI the callback listener binds to
    pub redirect_uri: Url,
    /// Configured scopes (empty: use the resource's advertised scopes)
    pub scopes: Vec<String>,
    /// Resource indicator (RFC 8707), the remote endpoint URL
    pub resource: String,
    /// How long to wait for the browser to come back
    pub login_timeout: Duration,
}

/// Interactive login and refresh against one authorization server
pub struct AuthorizationFlow {
    http_client: Client,
    cache: Cache,
    opener: Arc<dyn UrlOpener>,
    settings: FlowSettings,
    /// Held for the lifetime of a callback listener
    active_login: Mutex<()>,
}

impl AuthorizationFlow {
    /// Create a flow engine
    pub fn new(
        http_client: Client,
        cache: Cache,
        opener: Arc<dyn UrlOpener>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            http_client,
            cache,
            opener,
            settings,
            active_login: Mutex::new(()),
        }
    }

    /// Redirect URI used for registration and login
    pub fn redirect_uri(&self) -> &Url {
        &self.settings.redirect_uri
    }

    /// Run the interactive login end to end
    ///
    /// Fails fast if another login already owns the callback listener;
    /// callers that want to queue must serialize around this call.
    pub async fn authorize(
        &self,
        doc: &DiscoveryDocument,
        client: &ClientRegistration,
    ) -> Result<TokenRecord> {
        let _guard = self.active_login.try_lock().map_err(|_| {
            Error::Authorization("Another interactive login is already in progress".to_string())
        })?;

        let pkce = PkceChallenge::generate();
        let auth_url = self.authorization_url(doc, client, &pkce)?;

        // Listener first, so the redirect cannot race the bind
        let callback =
            CallbackServer::bind(&self.settings.redirect_uri, pkce.state.clone()).await?;

        info!(issuer = %doc.issuer, "Opening browser for authorization");
        if let Err(e) = self.opener.open(auth_url.as_str()) {
            warn!(error = %e, "Failed to open browser automatically");
            eprintln!("\nPlease authorize this client by visiting:\n{auth_url}\n");
        }

        let code = callback.wait(self.settings.login_timeout).await?;
        debug!("Received authorization code");

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("code_verifier", pkce.code_verifier.as_str()),
            ("client_id", client.client_id.as_str()),
            ("resource", self.settings.resource.as_str()),
        ];
        let token = self.exchange(doc, &params, None).await?;

        info!(issuer = %doc.issuer, "Authorization complete");
        Ok(token)
    }

    /// Exchange a refresh token for a new token record
    pub async fn refresh(
        &self,
        doc: &DiscoveryDocument,
        client: &ClientRegistration,
        refresh_token: &str,
    ) -> Result<TokenRecord> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("resource", self.settings.resource.as_str()),
        ];
        let token = self.exchange(doc, &params, Some(refresh_token)).await?;

        info!(issuer = %doc.issuer, "Token refreshed successfully");
        Ok(token)
    }

    /// Build the authorization request URL
    pub fn authorization_url(
        &self,
        doc: &DiscoveryDocument,
        client: &ClientRegistration,
        pkce: &PkceChallenge,
    ) -> Result<Url> {
        let mut auth_url = Url::parse(&doc.authorization_endpoint).map_err(|e| {
            Error::Discovery(format!(
                "Invalid authorization endpoint {}: {e}",
                doc.authorization_endpoint
            ))
        })?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &client.client_id);
            params.append_pair("redirect_uri", self.settings.redirect_uri.as_str());
            if let Some(scope) = requested_scope(&self.settings.scopes, doc) {
                params.append_pair("scope", &scope);
            }
            params.append_pair("code_challenge_method", "S256");
            params.append_pair("code_challenge", &pkce.code_challenge);
            params.append_pair("state", &pkce.state);
            params.append_pair("resource", &self.settings.resource);
        }

        Ok(auth_url)
    }

    /// POST a grant to the token endpoint and persist the result
    async fn exchange(
        &self,
        doc: &DiscoveryDocument,
        params: &[(&str, &str)],
        previous_refresh: Option<&str>,
    ) -> Result<TokenRecord> {
        let response = self
            .http_client
            .post(&doc.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| Error::Token(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Token(format!(
                "Token endpoint returned HTTP {status} - {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Token(format!("Failed to parse token response: {e}")))?;

        let token = TokenRecord::issued(
            token_response.access_token,
            token_response
                .refresh_token
                .or_else(|| previous_refresh.map(String::from)),
            token_response.expires_in,
            token_response.scope,
            unix_now(),
        );

        self.cache.put(CacheKey::Tokens, &token).await;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::storage::MemoryStore;

    struct NoBrowser;

    impl UrlOpener for NoBrowser {
        fn open(&self, _url: &str) -> Result<()> {
            Err(Error::Internal("no browser in tests".into()))
        }
    }

    fn flow(scopes: Vec<String>) -> AuthorizationFlow {
        AuthorizationFlow::new(
            Client::new(),
            Cache::new(Arc::new(MemoryStore::new()), "ns"),
            Arc::new(NoBrowser),
            FlowSettings {
                redirect_uri: Url::parse("http://127.0.0.1:8976/callback").unwrap(),
                scopes,
                resource: "https://mcp.example.com/mcp".into(),
                login_timeout: Duration::from_secs(1),
            },
        )
    }

    fn doc() -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: "https://idp.example.com".into(),
            authorization_endpoint: "https://idp.example.com/authorize?tenant=acme".into(),
            token_endpoint: "https://idp.example.com/token".into(),
            registration_endpoint: None,
            scopes_supported: vec![],
        }
    }

    fn registration() -> ClientRegistration {
        ClientRegistration {
            issuer: "https://idp.example.com".into(),
            client_id: "client-1".into(),
            redirect_uris: vec!["http://127.0.0.1:8976/callback".into()],
        }
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let pkce = PkceChallenge::generate();
        let url = flow(vec!["read".into(), "write".into()])
            .authorization_url(&doc(), &registration(), &pkce)
            .unwrap();

        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();

        assert_eq!(pairs["tenant"], "acme");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8976/callback");
        assert_eq!(pairs["scope"], "read write");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], pkce.code_challenge);
        assert_eq!(pairs["state"], pkce.state);
        assert_eq!(pairs["resource"], "https://mcp.example.com/mcp");
        assert!(!pairs.contains_key("code_verifier"));
    }

    #[test]
    fn authorization_url_omits_unknown_scope() {
        let pkce = PkceChallenge::generate();
        let url = flow(vec![])
            .authorization_url(&doc(), &registration(), &pkce)
            .unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "scope"));
    }

    #[test]
    fn token_response_minimal() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token": "at", "token_type": "Bearer"}"#).unwrap();
        assert_eq!(resp.access_token, "at");
        assert!(resp.expires_in.is_none());
        assert!(resp.refresh_token.is_none());
    }

    #[tokio::test]
    async fn refresh_against_unreachable_endpoint_is_token_error() {
        let mut d = doc();
        // Port 9 (discard) is reserved; nothing listens there in test environments
        d.token_endpoint = "http://127.0.0.1:9/token".into();

        let err = flow(vec![])
            .refresh(&d, &registration(), "rt")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Token(_)));
    }

    #[tokio::test]
    async fn second_login_fails_fast_while_one_is_waiting() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let flow = Arc::new(AuthorizationFlow::new(
            Client::new(),
            Cache::new(Arc::new(MemoryStore::new()), "ns"),
            Arc::new(NoBrowser),
            FlowSettings {
                redirect_uri: Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap(),
                scopes: vec![],
                resource: "https://mcp.example.com/mcp".into(),
                login_timeout: Duration::from_millis(500),
            },
        ));

        let waiting = tokio::spawn({
            let flow = Arc::clone(&flow);
            async move { flow.authorize(&doc(), &registration()).await }
        });

        // The first login holds the guard once its listener is up
        for _ in 0..100 {
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = flow.authorize(&doc(), &registration()).await.unwrap_err();
        assert!(
            matches!(err, Error::Authorization(ref m) if m.contains("already in progress")),
            "{err}"
        );

        let first = waiting.await.unwrap().unwrap_err();
        assert!(
            matches!(first, Error::Authorization(ref m) if m.contains("No authorization callback")),
            "{first}"
        );
    }
}
