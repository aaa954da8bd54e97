//! Relay loop
//!
//! Reads one JSON value per line, obtains a valid bearer token, forwards
//! the value to the remote endpoint and writes back one JSON value per
//! line. Every line is handled as its own task; responses are written in
//! completion order.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::browser::UrlOpener;
use crate::config::Config;
use crate::oauth::{
    AuthorizationFlow, Cache, ClientRegistrar, ClientRegistration, DiscoveryDocument,
    DiscoveryResolver, FlowSettings, KeyValueStore, TokenManager, TokenRecord,
};
use crate::protocol::{ErrorResponse, is_notification, request_id};
use crate::transport::{Forwarded, HttpForwarder, build_client, spawn_line_writer};
use crate::{Error, Result};

/// Credentials in effect for one forward
#[derive(Debug, Clone)]
pub struct Session {
    /// Resolved authorization server
    pub discovery: DiscoveryDocument,
    /// Client identity used with it
    pub client: ClientRegistration,
    /// Valid token
    pub token: TokenRecord,
}

/// The stdio-to-HTTP relay
pub struct Relay {
    cache: Cache,
    discovery: DiscoveryResolver,
    registrar: ClientRegistrar,
    tokens: TokenManager,
    forwarder: HttpForwarder,
    /// Serializes discovery and registration across concurrent requests
    identity_lock: Mutex<()>,
    max_in_flight: usize,
    shutdown_grace: Duration,
}

impl Relay {
    /// Wire up the relay from configuration
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        opener: Arc<dyn UrlOpener>,
    ) -> Result<Self> {
        config.validate()?;

        let http_client = build_client(&config.http)?;
        let redirect_uri = config.redirect_uri()?;
        let cache = Cache::for_remote(store, &config.remote_url);

        let flow = AuthorizationFlow::new(
            http_client.clone(),
            cache.clone(),
            opener,
            FlowSettings {
                redirect_uri: redirect_uri.clone(),
                scopes: config.scopes.clone(),
                resource: config.remote_url.clone(),
                login_timeout: config.login_timeout,
            },
        );

        Ok(Self {
            discovery: DiscoveryResolver::new(
                http_client.clone(),
                config.remote_url.clone(),
                cache.clone(),
            ),
            registrar: ClientRegistrar::new(
                http_client.clone(),
                cache.clone(),
                config.client_name.clone(),
                redirect_uri.to_string(),
                config.scopes.clone(),
            ),
            tokens: TokenManager::new(cache.clone(), Arc::new(flow)),
            forwarder: HttpForwarder::new(http_client, config.remote_url.clone()),
            identity_lock: Mutex::new(()),
            cache,
            max_in_flight: config.max_in_flight,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Cache scoped to the configured remote
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Resolve discovery, ensure a client, ensure a token
    pub async fn authenticate(&self) -> Result<Session> {
        let (discovery, client) = self.identity().await?;
        let token = self.tokens.ensure_token(&discovery, &client).await?;
        Ok(Session {
            discovery,
            client,
            token,
        })
    }

    /// Authorization server and client identity, resolved at most once at a time
    ///
    /// Both steps read the cache first, so whoever waited on the lock picks
    /// up what the previous holder discovered and registered.
    async fn identity(&self) -> Result<(DiscoveryDocument, ClientRegistration)> {
        let _resolving = self.identity_lock.lock().await;
        let discovery = self.discovery.resolve().await?;
        let client = self.registrar.ensure_client(&discovery).await?;
        Ok((discovery, client))
    }

    /// Forward one payload, renewing the token and retrying once on 401
    pub async fn forward(&self, payload: &Value) -> Result<Option<Value>> {
        let session = self.authenticate().await?;

        match self.forwarder.forward(payload, &session.token.access_token).await? {
            Forwarded::Body(body) => return Ok(body),
            Forwarded::Unauthorized => {
                info!("Remote rejected the access token, renewing and retrying once");
            }
        }

        self.tokens.invalidate(&session.token).await;
        let token = self
            .tokens
            .ensure_token(&session.discovery, &session.client)
            .await?;

        match self.forwarder.forward(payload, &token.access_token).await? {
            Forwarded::Body(body) => Ok(body),
            Forwarded::Unauthorized => Err(Error::Unauthorized(
                "Remote rejected the request again after the token was renewed".to_string(),
            )),
        }
    }

    /// Relay one decoded message; `None` means nothing is written back
    pub async fn handle_message(&self, payload: Value) -> Option<String> {
        let id = request_id(&payload);

        let err = match self.forward(&payload).await {
            Ok(Some(body)) => return Some(encode(&body)),
            Ok(None) if is_notification(&payload) => return None,
            Ok(None) => Error::Transport("Remote returned an empty response".to_string()),
            Err(e) => e,
        };

        warn!(error = %err, id = %id, "Relayed request failed");
        Some(encode(&ErrorResponse::from_error(id, &err)))
    }

    /// Relay one raw input line; blank lines produce nothing
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        match decode(line.as_bytes())? {
            Ok(payload) => self.handle_message(payload).await,
            Err(response) => Some(response),
        }
    }

    /// Run until `reader` reaches end of input
    pub async fn run<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, writer_task) = spawn_line_writer(writer);
        let limiter = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut read_error = None;

        info!(max_in_flight = self.max_in_flight, "Relay ready");

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to read input, stopping");
                    read_error = Some(e);
                    break;
                }
            }
            while tasks.try_join_next().is_some() {}

            let payload = match decode(&line) {
                None => continue,
                Some(Ok(payload)) => payload,
                Some(Err(response)) => {
                    if tx.send(response).is_err() {
                        break;
                    }
                    continue;
                }
            };

            let permit = Arc::clone(&limiter)
                .acquire_owned()
                .await
                .map_err(|_| Error::Internal("Request limiter closed".to_string()))?;

            let relay = Arc::clone(&self);
            let tx = tx.clone();
            tasks.spawn(async move {
                if let Some(response) = relay.handle_message(payload).await {
                    let _ = tx.send(response);
                }
                drop(permit);
            });
        }

        info!(in_flight = tasks.len(), "Input closed");

        if !tasks.is_empty() && !self.shutdown_grace.is_zero() {
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(abandoned = tasks.len(), "In-flight requests abandoned at shutdown");
            }
        }
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        drop(tx);
        writer_task
            .await
            .map_err(|e| Error::Internal(format!("Output writer panicked: {e}")))??;

        match read_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Decode a raw input line: `None` for blank lines, `Err` with the
/// parse-error response for anything that is not UTF-8 JSON
fn decode(line: &[u8]) -> Option<std::result::Result<Value, String>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    Some(serde_json::from_slice(line).map_err(|e| {
        debug!(error = %e, "Rejecting malformed input line");
        encode(&ErrorResponse::parse_error())
    }))
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
