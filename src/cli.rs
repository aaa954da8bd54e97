//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Stdio MCP relay for OAuth-protected remote servers
#[derive(Parser, Debug)]
#[command(name = "mcp-oauth-relay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_OAUTH_RELAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Remote MCP endpoint URL
    #[arg(short, long, global = true)]
    pub remote_url: Option<String>,

    /// Scope to request (repeatable)
    #[arg(short, long = "scope", global = true)]
    pub scopes: Vec<String>,

    /// Port of the local OAuth callback listener
    #[arg(long, global = true)]
    pub callback_port: Option<u16>,

    /// Directory for cached credentials
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_OAUTH_RELAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_OAUTH_RELAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to relay mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Relay stdin/stdout to the remote endpoint (default)
    Run,

    /// Authenticate now and cache the resulting token
    Login,

    /// Show cached credentials for the remote endpoint
    Status,
}

impl Cli {
    /// Apply command-line overrides on top of file and environment settings
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref url) = self.remote_url {
            config.remote_url.clone_from(url);
        }
        if !self.scopes.is_empty() {
            config.scopes.clone_from(&self.scopes);
        }
        if let Some(port) = self.callback_port {
            config.callback.port = port;
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
    }
}
