//! Error types for the OAuth relay

use std::io;

use thiserror::Error;

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;

/// Relay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protected resource or authorization server metadata unusable
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// No usable client identity could be obtained
    #[error("Registration error: {0}")]
    Registration(String),

    /// Token endpoint rejected a grant
    #[error("Token error: {0}")]
    Token(String),

    /// Interactive login failed (state mismatch, missing code, AS error)
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Remote kept rejecting the bearer token after a fresh one was obtained
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Remote answered with a non-success status
    #[error("Remote returned HTTP {status}: {message}")]
    Forward {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error came out of the authentication lifecycle
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Discovery(_)
                | Self::Registration(_)
                | Self::Token(_)
                | Self::Authorization(_)
                | Self::Unauthorized(_)
        )
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            e if e.is_auth() => rpc_codes::AUTH_FAILED,
            _ => rpc_codes::FORWARD_FAILED,
        }
    }
}

/// JSON-RPC error codes emitted by the relay
pub mod rpc_codes {
    /// Parse error - Invalid JSON on the input stream
    pub const PARSE_ERROR: i32 = -32700;
    /// Forwarding or transport failure
    pub const FORWARD_FAILED: i32 = -32000;
    /// Terminal authentication failure, or authorization failure after retry
    pub const AUTH_FAILED: i32 = -32001;
}
