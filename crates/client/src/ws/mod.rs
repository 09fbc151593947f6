//! Real-time notification delivery over a WebSocket.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────────┐  connect / disconnect  ┌─────────────────────┐
//!   │ ReconnectController  │ ─────────────────────▶ │ Transport (STOMP)   │
//!   │ (state + backoff)    │ ◀───── events ──────── │                     │
//!   └──────────────────────┘                        └─────────────────────┘
//!              │ InboundMessage (unbounded channel)
//!              ▼
//!   ┌──────────────────────┐        mutations       ┌─────────────────────┐
//!   │ MessageRouter        │ ─────────────────────▶ │ NotificationsHandle │
//!   │ (single dispatch     │                        │ (store)             │
//!   │  loop)               │                        └─────────────────────┘
//!   └──────────────────────┘
//! ```
//!
//! The controller is the only writer of the connection state; the router is
//! the only consumer of inbound messages.

mod connection;
pub mod frame;
mod router;
mod transport;

use thiserror::Error;

pub use connection::{Backoff, ConnectionState, ReconnectConfig, ReconnectController};
pub use router::{MessageRouter, RouteOutcome};
pub use transport::{ConnectRequest, StompTransport, Transport, TransportEvent, TransportSession};

/// A message body received on one of the subscribed channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub destination: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("could not open socket: {0}")]
    Connect(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("server rejected the connection: {0}")]
    Rejected(String),
    #[error("connection closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Socket URL for an API base URL: `http` becomes `ws`, `https` becomes `wss`.
pub fn ws_url(api_url: &str, path: &str) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(api_url)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    // Switching between special schemes never fails.
    let _ = url.set_scheme(scheme);

    let base_path = url.path().trim_end_matches('/').to_string();
    let path = path.trim_start_matches('/');
    url.set_path(&format!("{base_path}/{path}"));
    url.set_query(None);
    Ok(url.to_string())
}
