//! Transports on either side of the relay
//!
//! - [`HttpForwarder`]: POSTs relayed payloads to the remote endpoint
//! - [`spawn_line_writer`]: serializes NDJSON output lines onto stdout

mod http;
mod stdio;

pub use self::http::{Forwarded, HttpForwarder, build_client};
pub use self::stdio::spawn_line_writer;
