//! HTTP API client with bearer authentication.

use academia_shared::{ApiError, NotificationId, NotificationPayload, NotificationRecord, UnreadCount};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// Notification endpoints of the academia backend.
///
/// The service only talks to the backend through this trait, so tests can
/// substitute an in-memory implementation.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>, ApiError>;
    async fn unread_count(&self, user_id: &str) -> Result<u64, ApiError>;
    async fn mark_as_read(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError>;
    async fn mark_as_unread(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError>;
    async fn mark_all_as_read(&self, user_id: &str) -> Result<(), ApiError>;
    async fn delete_notification(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError>;
    async fn delete_all_read(&self, user_id: &str) -> Result<(), ApiError>;
}

/// HTTP client for the academia REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the bearer credential sent with every request
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Send a request and return the body of a successful response.
    async fn execute(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }
        Ok(text)
    }

    /// Make an authenticated GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.execute(self.client.get(self.url(path))).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Make an authenticated PUT request without a body
    pub async fn put_empty(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.client.put(self.url(path))).await.map(|_| ())
    }

    /// Make an authenticated DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.client.delete(self.url(path))).await.map(|_| ())
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a notification list element by element.
///
/// Missing timestamps default to `now`; elements that are not notifications
/// at all are skipped so one bad record does not hide the rest.
fn decode_notifications(text: &str, now: DateTime<Utc>) -> Result<Vec<NotificationRecord>, ApiError> {
    let items: Vec<serde_json::Value> =
        serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))?;
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<NotificationPayload>(item) {
            Ok(payload) => Some(payload.into_record(now)),
            Err(e) => {
                crate::log_warn!("Skipping undecodable notification: {}", e);
                None
            }
        })
        .collect())
}

fn user_path(user_id: &str) -> String {
    format!("/api/notifications/user/{}", urlencoding::encode(user_id))
}

fn notification_path(user_id: &str, id: &NotificationId) -> String {
    format!(
        "{}/{}",
        user_path(user_id),
        urlencoding::encode(id.as_str())
    )
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>, ApiError> {
        let text = self.execute(self.client.get(self.url(&user_path(user_id)))).await?;
        decode_notifications(&text, Utc::now())
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64, ApiError> {
        let count: UnreadCount = self
            .get_json(&format!("{}/unread-count", user_path(user_id)))
            .await?;
        Ok(count.value())
    }

    async fn mark_as_read(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError> {
        self.put_empty(&format!("{}/read", notification_path(user_id, id)))
            .await
    }

    async fn mark_as_unread(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError> {
        self.put_empty(&format!("{}/unread", notification_path(user_id, id)))
            .await
    }

    async fn mark_all_as_read(&self, user_id: &str) -> Result<(), ApiError> {
        self.put_empty(&format!("{}/read-all", user_path(user_id)))
            .await
    }

    async fn delete_notification(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError> {
        self.delete(&notification_path(user_id, id)).await
    }

    async fn delete_all_read(&self, user_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("{}/read", user_path(user_id))).await
    }
}
