//! Session gate: the signed-in identity and its credential.
//!
//! The notification subsystem only runs while a valid session is present.
//! Consumers follow changes through [`SessionGate::watch`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::api_client::ApiClient;
use crate::config::ClientConfig;
use crate::ws::{self, ConnectRequest};

/// Identity and bearer credential of the signed-in user.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub token: String,
}

impl AuthSession {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }

    /// Both an identity and a credential are present.
    pub fn is_valid(&self) -> bool {
        !self.user_id.trim().is_empty() && !self.token.trim().is_empty()
    }
}

/// Shared authentication context.
///
/// Cheap to clone; clones observe the same session.
#[derive(Clone, Debug)]
pub struct SessionGate {
    session: Arc<watch::Sender<Option<AuthSession>>>,
    api_url: String,
    ws_path: String,
}

impl SessionGate {
    pub fn new(api_url: impl Into<String>, ws_path: impl Into<String>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            session: Arc::new(session),
            api_url: api_url.into(),
            ws_path: ws_path.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.api_url.clone(), config.ws_path.clone())
    }

    /// Sign in. Sessions without an identity or credential are refused.
    pub fn login(&self, session: AuthSession) -> bool {
        if !session.is_valid() {
            crate::log_warn!("Refusing session without identity or credential");
            return false;
        }
        crate::log_info!("Session started for {}", session.user_id);
        self.session.send_replace(Some(session));
        true
    }

    /// Sign out and clear the session.
    pub fn logout(&self) {
        if let Some(previous) = self.session.send_replace(None) {
            crate::log_info!("Session ended for {}", previous.user_id);
        }
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.session.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<AuthSession>> {
        self.session.subscribe()
    }

    /// Check if user is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Get the current user ID
    pub fn user_id(&self) -> Option<String> {
        self.session.borrow().as_ref().map(|s| s.user_id.clone())
    }

    /// Create an API client configured for the current session
    pub fn client(&self) -> ApiClient {
        client_for(&self.api_url, self.current().as_ref())
    }

    /// Socket URL derived from the API base URL.
    pub fn ws_url(&self) -> Result<String, url::ParseError> {
        ws::ws_url(&self.api_url, &self.ws_path)
    }

    /// Connect request for the current session, if any.
    pub fn connect_request(&self) -> Option<ConnectRequest> {
        let session = self.current()?;
        connect_request_for(&self.api_url, &self.ws_path, &session)
    }
}

/// API client carrying `session`'s credential.
pub fn client_for(api_url: &str, session: Option<&AuthSession>) -> ApiClient {
    ApiClient::new()
        .with_base_url(api_url)
        .with_token(session.map(|s| s.token.clone()))
}

/// Socket connect request carrying `session`'s credential.
pub fn connect_request_for(
    api_url: &str,
    ws_path: &str,
    session: &AuthSession,
) -> Option<ConnectRequest> {
    match ws::ws_url(api_url, ws_path) {
        Ok(url) => Some(ConnectRequest {
            url,
            token: session.token.clone(),
        }),
        Err(e) => {
            crate::log_error!("Cannot derive socket URL from {:?}: {}", api_url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_requires_identity_and_credential() {
        let gate = SessionGate::new("http://localhost:8080", "/ws");
        assert!(!gate.login(AuthSession::new("", "token")));
        assert!(!gate.login(AuthSession::new("u-1", "  ")));
        assert!(!gate.is_authenticated());

        assert!(gate.login(AuthSession::new("u-1", "token")));
        assert_eq!(gate.user_id().as_deref(), Some("u-1"));

        gate.logout();
        assert!(gate.current().is_none());
        // Logging out twice is harmless.
        gate.logout();
    }

    #[test]
    fn watchers_see_session_changes() {
        let gate = SessionGate::new("http://localhost:8080", "/ws");
        let mut rx = gate.watch();
        gate.login(AuthSession::new("u-1", "token"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|s| s.user_id.as_str()),
            Some("u-1")
        );
    }

    #[test]
    fn connect_request_uses_socket_scheme_and_token() {
        let gate = SessionGate::new("https://campus.example.edu", "/ws");
        assert!(gate.connect_request().is_none());

        gate.login(AuthSession::new("u-1", "secret"));
        let request = gate.connect_request().unwrap();
        assert_eq!(request.url, "wss://campus.example.edu/ws");
        assert_eq!(request.token, "secret");
        assert_eq!(gate.client().base_url(), "https://campus.example.edu");
    }
}
