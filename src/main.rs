//! MCP OAuth Relay - stdio to OAuth-protected remote MCP endpoint

use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{error, info};

use mcp_oauth_relay::{
    browser::SystemBrowser,
    cli::{Cli, Command},
    config::Config,
    oauth::{CacheKey, ClientRegistration, DiscoveryDocument, TokenRecord, unix_now},
    relay::Relay,
    setup_tracing,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            cli.apply(&mut config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let relay = match build_relay(&config) {
        Ok(relay) => relay,
        Err(e) => {
            error!("Failed to start relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Login) => run_login(&relay).await,
        Some(Command::Status) => run_status(&relay).await,
        Some(Command::Run) | None => run_relay(relay, &config).await,
    }
}

fn build_relay(config: &Config) -> mcp_oauth_relay::Result<Relay> {
    config.validate()?;
    let store = config.file_store()?;
    info!(cache_dir = %store.base_dir().display(), "Using credential cache");
    Relay::new(config, Arc::new(store), Arc::new(SystemBrowser))
}

/// Relay stdin to the remote endpoint until stdin closes
async fn run_relay(relay: Relay, config: &Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        remote = %config.remote_url,
        "Starting MCP OAuth relay"
    );

    if let Err(e) = Arc::new(relay)
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await
    {
        error!("Relay error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Relay shutdown complete");
    ExitCode::SUCCESS
}

/// Authenticate ahead of time so the relay starts without a browser round-trip
async fn run_login(relay: &Relay) -> ExitCode {
    match relay.authenticate().await {
        Ok(session) => {
            eprintln!("Authenticated with {}", session.discovery.issuer);
            eprintln!("  Client ID:  {}", session.client.client_id);
            eprintln!("  Expires:    {}", format_expiry(session.token.expires_at));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Login failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print what is cached for the remote endpoint; never prints secrets
async fn run_status(relay: &Relay) -> ExitCode {
    let cache = relay.cache();
    println!("Cache namespace: {}", cache.namespace());

    match cache.get::<DiscoveryDocument>(CacheKey::Discovery).await {
        Some(doc) => {
            println!("Issuer:          {}", doc.issuer);
            println!("Token endpoint:  {}", doc.token_endpoint);
        }
        None => println!("Issuer:          (not discovered)"),
    }

    match cache.get::<ClientRegistration>(CacheKey::Client).await {
        Some(client) => println!("Client ID:       {}", client.client_id),
        None => println!("Client ID:       (not registered)"),
    }

    match cache.get::<TokenRecord>(CacheKey::Tokens).await {
        Some(token) => {
            let state = if token.expires_at > unix_now() {
                "valid"
            } else {
                "expired"
            };
            println!(
                "Access token:    {state}, expires {}",
                format_expiry(token.expires_at)
            );
            println!(
                "Refresh token:   {}",
                if token.refresh_token.is_some() {
                    "present"
                } else {
                    "absent"
                }
            );
            if let Some(scope) = token.scope {
                println!("Scope:           {scope}");
            }
        }
        None => println!("Access token:    (none)"),
    }

    ExitCode::SUCCESS
}

fn format_expiry(expires_at: u64) -> String {
    i64::try_from(expires_at)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map_or_else(|| expires_at.to_string(), |t| t.to_rfc3339())
}
