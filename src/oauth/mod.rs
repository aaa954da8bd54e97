//! OAuth 2.1 client side of the relay
//!
//! Implements the authorization code flow with PKCE (RFC 7636) for remote
//! endpoints that require bearer authentication.
//!
//! Features:
//! - Protected resource + authorization server metadata discovery (RFC 9728, RFC 8414)
//! - Dynamic client registration (RFC 7591)
//! - Browser-based authorization with a single-use callback listener
//! - Token persistence and silent refresh

mod callback;
mod client;
mod lifecycle;
mod metadata;
mod pkce;
mod registration;
mod storage;

pub use callback::{CallbackParams, CallbackServer};
pub use client::{AuthorizationFlow, FlowSettings};
pub use lifecycle::{REUSE_LEEWAY_SECS, TokenManager};
pub use metadata::{
    DiscoveryDocument, DiscoveryResolver, ProtectedResourceMetadata, base_url, metadata_url,
};
pub use pkce::{PkceChallenge, challenge_for};
pub use registration::{ClientRegistrar, ClientRegistration, requested_scope};
pub use storage::{
    Cache, CacheKey, FileStore, KeyValueStore, MemoryStore, TokenRecord, namespace_for, unix_now,
};
