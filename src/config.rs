//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::oauth::FileStore;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote MCP endpoint that requires bearer authentication
    pub remote_url: String,
    /// Scopes to request (empty: whatever the resource advertises)
    pub scopes: Vec<String>,
    /// Client name sent during dynamic registration
    pub client_name: String,
    /// Local OAuth callback listener
    pub callback: CallbackConfig,
    /// Directory for cached discovery, registration and tokens
    /// (default: `~/.mcp-oauth-relay`)
    pub cache_dir: Option<PathBuf>,
    /// Outbound HTTP settings
    pub http: HttpConfig,
    /// How long to wait for the browser to return from the login page
    #[serde(with = "humantime_serde")]
    pub login_timeout: Duration,
    /// Maximum relayed requests in flight at once
    pub max_in_flight: usize,
    /// Time granted to in-flight requests once input closes
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            scopes: Vec::new(),
            client_name: "MCP OAuth Relay".to_string(),
            callback: CallbackConfig::default(),
            cache_dir: None,
            http: HttpConfig::default(),
            login_timeout: Duration::from_secs(300),
            max_in_flight: 32,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Callback listener configuration; together these form the redirect URI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Host to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Callback path
    pub path: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8976,
            path: "/callback".to_string(),
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Deadline for each outbound request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Deadline for establishing a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file and the environment
    ///
    /// Environment variables use the `MCP_OAUTH_RELAY_` prefix, with `__`
    /// separating nested keys (`MCP_OAUTH_RELAY_CALLBACK__PORT=9000`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MCP_OAUTH_RELAY_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the settings that have no sensible fallback
    pub fn validate(&self) -> Result<()> {
        if self.remote_url.is_empty() {
            return Err(Error::Config(
                "remote_url is required (--remote-url or MCP_OAUTH_RELAY_REMOTE_URL)".to_string(),
            ));
        }

        let remote = Url::parse(&self.remote_url)
            .map_err(|e| Error::Config(format!("Invalid remote_url {}: {e}", self.remote_url)))?;
        if !matches!(remote.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "remote_url must be http(s), got {}",
                remote.scheme()
            )));
        }

        if !self.callback.path.starts_with('/') {
            return Err(Error::Config(format!(
                "callback.path must start with '/', got {:?}",
                self.callback.path
            )));
        }

        if self.max_in_flight == 0 {
            return Err(Error::Config("max_in_flight must be at least 1".to_string()));
        }

        self.redirect_uri().map(|_| ())
    }

    /// The fixed redirect URI served by the callback listener
    pub fn redirect_uri(&self) -> Result<Url> {
        let host = &self.callback.host;
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.clone()
        };

        let uri = format!("http://{host}:{}{}", self.callback.port, self.callback.path);
        Url::parse(&uri).map_err(|e| Error::Config(format!("Invalid redirect URI {uri}: {e}")))
    }

    /// Open the on-disk cache
    pub fn file_store(&self) -> Result<FileStore> {
        match &self.cache_dir {
            Some(dir) => FileStore::new(expand_tilde(dir)),
            None => FileStore::default_location(),
        }
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
