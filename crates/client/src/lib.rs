//! Academia notification client.
//!
//! Keeps a signed-in user's notifications current: a bulk REST fetch when the
//! session starts, then envelopes pushed over a STOMP-over-WebSocket
//! connection with bounded exponential-backoff reconnection.
//!
//! ```rust,ignore
//! let config = ClientConfig::from_env();
//! let gate = SessionGate::from_config(&config);
//! let service = Arc::new(NotificationService::with_defaults(config));
//! service.follow(&gate);
//!
//! gate.login(AuthSession::new("u-42", token));
//! let unread = service.store().watch_unread();
//! ```

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod logging;
pub mod service;
pub mod stores;
pub mod ws;

pub use api_client::{ApiClient, NotificationApi};
pub use auth_session::{AuthSession, SessionGate};
pub use config::ClientConfig;
pub use service::{ApiFactory, NotificationError, NotificationService};
pub use stores::{NotificationStore, NotificationsHandle};
pub use ws::{ConnectionState, ReconnectConfig, ReconnectController};
