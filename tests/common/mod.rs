//! In-process OAuth authorization server and MCP endpoint for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use mcp_oauth_relay::browser::UrlOpener;
use mcp_oauth_relay::config::Config;
use mcp_oauth_relay::oauth::{
    Cache, CacheKey, ClientRegistration, DiscoveryDocument, MemoryStore, TokenRecord, unix_now,
};

/// Authorization code the mock server accepts
pub const GOOD_CODE: &str = "code-ok";

/// Observable state of the mock server
#[derive(Default)]
pub struct MockState {
    pub base: String,
    pub issuer_path: String,
    pub with_registration: bool,

    pub resource_hits: AtomicUsize,
    pub metadata_hits: AtomicUsize,
    pub register_hits: AtomicUsize,
    pub code_grants: AtomicUsize,
    pub refresh_grants: AtomicUsize,
    pub mcp_hits: AtomicUsize,

    /// Fail every refresh grant with 400
    pub reject_refresh: AtomicBool,
    /// Answer this many forwards with 401 regardless of token
    pub reject_forwards: AtomicUsize,
    /// Answer forwards with this status when non-zero
    pub forward_status: AtomicU16,

    pub accepted_tokens: Mutex<Vec<String>>,
    pub last_token_form: Mutex<Option<HashMap<String, String>>>,
    pub last_registration: Mutex<Option<Value>>,
    /// Echo this redirect URI from registration instead of the requested one
    pub echoed_redirect: Mutex<Option<String>>,
    issued: AtomicUsize,
}

impl MockState {
    pub fn issuer(&self) -> String {
        format!("{}{}", self.base, self.issuer_path)
    }

    pub fn remote_url(&self) -> String {
        format!("{}/mcp", self.base)
    }

    pub fn accept(&self, token: &str) {
        self.accepted_tokens.lock().push(token.to_string());
    }

    pub fn discovery(&self) -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: self.issuer(),
            authorization_endpoint: format!("{}/authorize", self.base),
            token_endpoint: format!("{}/token", self.base),
            registration_endpoint: self
                .with_registration
                .then(|| format!("{}/register", self.base)),
            scopes_supported: vec![],
        }
    }

    pub fn auth_calls(&self) -> usize {
        self.resource_hits.load(Ordering::SeqCst)
            + self.metadata_hits.load(Ordering::SeqCst)
            + self.register_hits.load(Ordering::SeqCst)
            + self.code_grants.load(Ordering::SeqCst)
            + self.refresh_grants.load(Ordering::SeqCst)
    }

    fn issue(&self) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("at-{n}");
        self.accept(&access);
        json!({
            "access_token": access,
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": format!("rt-{n}")
        })
    }
}

/// Running mock server, stopped on drop
pub struct MockServer {
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockServer {
    pub async fn start(issuer_path: &str, with_registration: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(MockState {
            base: format!("http://{addr}"),
            issuer_path: issuer_path.to_string(),
            with_registration,
            ..MockState::default()
        });

        let app = Router::new()
            .route(
                "/.well-known/oauth-protected-resource",
                get(protected_resource),
            )
            .route(
                &format!("/.well-known/oauth-authorization-server{issuer_path}"),
                get(authorization_server),
            )
            .route("/register", post(register))
            .route("/token", post(token))
            .route("/mcp", post(mcp))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, handle }
    }
}

async fn protected_resource(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.resource_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "resource": state.remote_url(),
        "authorization_servers": [state.issuer()]
    }))
}

async fn authorization_server(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.metadata_hits.fetch_add(1, Ordering::SeqCst);
    let doc = state.discovery();
    let mut body = json!({
        "issuer": doc.issuer,
        "authorization_endpoint": doc.authorization_endpoint,
        "token_endpoint": doc.token_endpoint,
        "code_challenge_methods_supported": ["S256"]
    });
    if let Some(endpoint) = doc.registration_endpoint {
        body["registration_endpoint"] = Value::String(endpoint);
    }
    Json(body)
}

async fn register(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let n = state.register_hits.fetch_add(1, Ordering::SeqCst) + 1;
    let redirect_uris = match state.echoed_redirect.lock().clone() {
        Some(uri) => json!([uri]),
        None => body["redirect_uris"].clone(),
    };
    *state.last_registration.lock() = Some(body);
    (
        StatusCode::CREATED,
        Json(json!({
            "client_id": format!("client-{n}"),
            "redirect_uris": redirect_uris
        })),
    )
}

async fn token(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    *state.last_token_form.lock() = Some(form.clone());

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            state.code_grants.fetch_add(1, Ordering::SeqCst);
            if form.get("code").map(String::as_str) != Some(GOOD_CODE)
                || !form.contains_key("code_verifier")
            {
                return invalid_grant();
            }
            Json(state.issue()).into_response()
        }
        Some("refresh_token") => {
            state.refresh_grants.fetch_add(1, Ordering::SeqCst);
            if state.reject_refresh.load(Ordering::SeqCst) {
                return invalid_grant();
            }
            Json(state.issue()).into_response()
        }
        _ => invalid_grant(),
    }
}

fn invalid_grant() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "invalid_grant"})),
    )
        .into_response()
}

async fn mcp(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    state.mcp_hits.fetch_add(1, Ordering::SeqCst);

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();

    let forced_reject = state
        .reject_forwards
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if forced_reject || !state.accepted_tokens.lock().contains(&bearer) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")],
        )
            .into_response();
    }

    let status = state.forward_status.load(Ordering::SeqCst);
    if status != 0 {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, "upstream exploded").into_response();
    }

    let method = payload["method"].clone();
    match payload.get("id") {
        Some(id) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"echo": method}
        }))
        .into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Browser stand-in that follows the authorization URL straight to the
/// redirect URI, as if the user had approved the login
#[derive(Default)]
pub struct AutoApprove {
    pub opened: Mutex<Vec<String>>,
    /// Replace the echoed `state` with this value
    pub forged_state: Option<String>,
}

impl AutoApprove {
    pub fn forging_state(state: &str) -> Self {
        Self {
            forged_state: Some(state.to_string()),
            ..Self::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

impl UrlOpener for AutoApprove {
    fn open(&self, url: &str) -> mcp_oauth_relay::Result<()> {
        self.opened.lock().push(url.to_string());

        let auth_url = Url::parse(url).unwrap();
        let params: HashMap<String, String> = auth_url.query_pairs().into_owned().collect();
        let state = self
            .forged_state
            .clone()
            .unwrap_or_else(|| params["state"].clone());

        let mut callback = Url::parse(&params["redirect_uri"]).unwrap();
        callback
            .query_pairs_mut()
            .append_pair("code", GOOD_CODE)
            .append_pair("state", &state);

        tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });
        Ok(())
    }
}

/// Browser stand-in for tests that must never reach interactive login
pub struct NoLogin;

impl UrlOpener for NoLogin {
    fn open(&self, url: &str) -> mcp_oauth_relay::Result<()> {
        panic!("unexpected interactive login: {url}");
    }
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn config_for(state: &MockState) -> Config {
    let mut config = Config {
        remote_url: state.remote_url(),
        login_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(5),
        ..Config::default()
    };
    config.callback.port = free_port();
    config
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Pre-populate discovery, registration and token records
pub async fn seed(store: &Arc<MemoryStore>, config: &Config, state: &MockState, token: TokenRecord) {
    let cache = Cache::for_remote(store.clone(), &config.remote_url);
    cache.put(CacheKey::Discovery, &state.discovery()).await;
    cache
        .put(
            CacheKey::Client,
            &ClientRegistration {
                issuer: state.issuer(),
                client_id: "seeded-client".to_string(),
                redirect_uris: vec![config.redirect_uri().unwrap().to_string()],
            },
        )
        .await;
    cache.put(CacheKey::Tokens, &token).await;
}

pub fn fresh_token(access: &str) -> TokenRecord {
    TokenRecord {
        access_token: access.to_string(),
        refresh_token: Some(format!("{access}-refresh")),
        expires_at: unix_now() + 3600,
        scope: None,
    }
}

pub fn cache_for(store: &Arc<MemoryStore>, config: &Config) -> Cache {
    Cache::for_remote(store.clone(), &config.remote_url)
}
