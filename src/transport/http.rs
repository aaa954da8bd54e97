//! HTTP forwarding to the remote endpoint
//!
//! One POST per relayed payload, JSON in and JSON out. Streaming responses
//! are not supported; the remote is asked for `application/json` only.

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::HttpConfig;
use crate::{Error, Result};

const SESSION_HEADER: &str = "mcp-session-id";

/// Longest remote error body quoted back to the client
const MAX_ERROR_BODY: usize = 512;

/// Build the HTTP client shared by discovery, registration, token and forwarding calls
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
}

/// Outcome of one forwarding attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Forwarded {
    /// 2xx; `None` when the body was empty
    Body(Option<Value>),
    /// 401: the bearer token was rejected
    Unauthorized,
}

/// Forwards payloads to the remote endpoint with a bearer token
pub struct HttpForwarder {
    client: Client,
    endpoint: String,
    /// Session ID handed out by the remote, replayed on later requests
    session_id: RwLock<Option<String>>,
}

impl HttpForwarder {
    /// Create a forwarder for `endpoint`
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            session_id: RwLock::new(None),
        }
    }

    /// POST `payload` with `Authorization: Bearer <access_token>`
    ///
    /// Non-success statuses other than 401 become [`Error::Forward`].
    pub async fn forward(&self, payload: &Value, access_token: &str) -> Result<Forwarded> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .json(payload);

        let session_id = self.session_id.read().clone();
        if let Some(ref id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await.map_err(|e| {
            Error::Transport(format!("Request to {} failed: {e}", self.endpoint))
        })?;

        let status = response.status();
        debug!(status = %status, url = %self.endpoint, "Remote responded");

        if status == StatusCode::UNAUTHORIZED {
            if let Some(challenge) = response.headers().get(header::WWW_AUTHENTICATE) {
                debug!(challenge = ?challenge, "Bearer token rejected");
            }
            return Ok(Forwarded::Unauthorized);
        }

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if session_id.as_deref() != Some(id) {
                info!(session_id = %id, "Stored session ID from response");
                *self.session_id.write() = Some(id.to_string());
            }
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Forward {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let body = response.text().await.map_err(|e| {
            Error::Transport(format!("Failed to read response from {}: {e}", self.endpoint))
        })?;

        if body.trim().is_empty() {
            return Ok(Forwarded::Body(None));
        }

        let value = serde_json::from_str(&body)
            .map_err(|e| Error::Transport(format!("Remote returned invalid JSON: {e}")))?;
        Ok(Forwarded::Body(Some(value)))
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_uses_reason_for_empty_body() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "  "),
            "Bad Gateway"
        );
    }

    #[test]
    fn error_message_truncates_long_bodies() {
        let long = "x".repeat(2_000);
        let msg = error_message(StatusCode::INTERNAL_SERVER_ERROR, &long);
        assert_eq!(msg.len(), MAX_ERROR_BODY + 3);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn error_message_keeps_short_bodies() {
        assert_eq!(
            error_message(StatusCode::FORBIDDEN, "{\"error\":\"insufficient_scope\"}"),
            "{\"error\":\"insufficient_scope\"}"
        );
    }

    #[test]
    fn client_builds_from_defaults() {
        assert!(build_client(&HttpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn unreachable_remote_is_transport_error() {
        let forwarder = HttpForwarder::new(Client::new(), "http://127.0.0.1:9/mcp");
        let err = forwarder
            .forward(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
