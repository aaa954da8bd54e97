//! MCP OAuth Relay Library
//!
//! Lets a local MCP client that only speaks newline-delimited JSON-RPC over
//! stdio talk to a remote MCP server protected by OAuth 2.0.
//!
//! # Features
//!
//! - **Discovery**: protected resource metadata, then RFC 8414 / OIDC
//!   authorization server metadata
//! - **Dynamic Client Registration**: registered once per issuer and cached
//! - **PKCE Login**: browser-based authorization code flow with a one-shot
//!   local callback listener
//! - **Token Lifecycle**: cached reuse, silent refresh, single retry on 401
//! - **Concurrency**: every input line relayed independently, logins
//!   serialized
//!
//! Standard output carries protocol traffic only; all diagnostics go to
//! standard error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging on standard error
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
