//! JSON-RPC framing for the relay's stdio side
//!
//! The relay does not interpret forwarded payloads; it only needs the
//! request identifier and the error envelope it writes on failure.

mod messages;

pub use messages::*;
