//! OAuth Callback Server
//!
//! A single-use HTTP listener on the fixed redirect URI that receives the
//! authorization code after the user approves the login in the browser.
//! The listener is torn down when the [`CallbackServer`] is dropped,
//! whichever way the login ends.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::{Error, Result};

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (for CSRF protection)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// State shared with the callback handler
struct CallbackState {
    expected_state: String,
    tx: Option<oneshot::Sender<Result<String>>>,
}

/// A bound callback listener awaiting one redirect
pub struct CallbackServer {
    rx: oneshot::Receiver<Result<String>>,
    server: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind to the redirect URI's host and port and start serving its path
    pub async fn bind(redirect_uri: &Url, expected_state: String) -> Result<Self> {
        let host = redirect_uri
            .host_str()
            .ok_or_else(|| Error::Config(format!("Redirect URI has no host: {redirect_uri}")))?;
        let port = redirect_uri
            .port_or_known_default()
            .ok_or_else(|| Error::Config(format!("Redirect URI has no port: {redirect_uri}")))?;

        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            Error::Authorization(format!("Failed to bind callback listener on {addr}: {e}"))
        })?;

        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(CallbackState {
            expected_state,
            tx: Some(tx),
        }));

        let app = Router::new()
            .route(redirect_uri.path(), get(handle_callback))
            .fallback(handle_not_found)
            .with_state(state);

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "Callback server error");
            }
        });

        info!(url = %redirect_uri, "OAuth callback listener ready");
        Ok(Self { rx, server })
    }

    /// Wait for the redirect and return the authorization code
    pub async fn wait(mut self, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Internal(
                "Callback channel closed unexpectedly".to_string(),
            )),
            Err(_) => Err(Error::Authorization(format!(
                "No authorization callback received within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.server.abort();
        debug!("OAuth callback listener closed");
    }
}

/// Handle the OAuth callback
async fn handle_callback(
    State(state): State<Arc<Mutex<CallbackState>>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    debug!(
        has_code = params.code.is_some(),
        has_state = params.state.is_some(),
        error = ?params.error,
        "Received OAuth callback"
    );

    let mut state = state.lock().await;
    let Some(tx) = state.tx.take() else {
        return (
            StatusCode::GONE,
            Html(error_page("already_completed", "This login attempt has already finished.")),
        );
    };

    let (result, page) = evaluate(&state.expected_state, params);
    let status = if result.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    let _ = tx.send(result);

    (status, Html(page))
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Decide the outcome of a callback and the page to show
fn evaluate(expected_state: &str, params: CallbackParams) -> (Result<String>, String) {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        let page = error_page(&error, &description);
        return (
            Err(Error::Authorization(format!(
                "Authorization server returned {error}: {description}"
            ))),
            page,
        );
    }

    if params.state.as_deref() != Some(expected_state) {
        return (
            Err(Error::Authorization(
                "State mismatch in authorization callback".to_string(),
            )),
            error_page("state_mismatch", "Invalid state parameter"),
        );
    }

    match params.code {
        Some(code) if !code.is_empty() => (Ok(code), success_page()),
        _ => (
            Err(Error::Authorization(
                "Authorization callback carried no code".to_string(),
            )),
            error_page("missing_code", "Authorization code not provided"),
        ),
    }
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
    <h1>Authorization Successful</h1>
    <p>You can close this window and return to your MCP client.</p>
    <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    let error = escape_html(error);
    let description = escape_html(description);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
    <h1>Authorization Failed</h1>
    <p>{description}</p>
    <p><code>Error: {error}</code></p>
</body>
</html>"#
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
