//! Envelopes pushed by the server over the notification socket.
//!
//! Every message body is a JSON object `{ "type": ..., "data": ... }`. The
//! `type` discriminator selects how `data` is interpreted.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{timestamp, NotificationId, NotificationKind, NotificationRecord, UnreadCount};

/// Default socket path, relative to the API base URL.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Per-user channel carrying individual notification envelopes.
pub const NOTIFICATIONS_CHANNEL: &str = "/user/queue/notifications";
/// Per-user channel carrying unread-count envelopes.
pub const NOTIFICATION_COUNT_CHANNEL: &str = "/user/queue/notification-count";

pub const TYPE_NOTIFICATION: &str = "NOTIFICATION";
pub const TYPE_NOTIFICATION_COUNT: &str = "NOTIFICATION_COUNT";
pub const TYPE_CONNECTION_STATUS: &str = "CONNECTION_STATUS";
pub const TYPE_ERROR: &str = "ERROR";

#[derive(Debug, Clone, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Payload of a `NOTIFICATION` envelope. Only `id` is mandatory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: NotificationId,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub json: Option<Value>,
}

impl NotificationPayload {
    /// Build a record, defaulting `read` to false and stamping missing
    /// timestamps with `now`.
    pub fn into_record(self, now: DateTime<Utc>) -> NotificationRecord {
        let mut record = NotificationRecord {
            id: self.id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            user_id: self.user_id,
            read: self.read.unwrap_or(false),
            read_at: self.read_at,
            created_at: self.created_at.unwrap_or(now),
            route: self.route,
            json: self.json,
        };
        record.normalize_read_state(now);
        record
    }
}

/// A decoded server envelope.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Notification(NotificationPayload),
    NotificationCount(UnreadCount),
    ConnectionStatus(Value),
    Error(Value),
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ServerEvent {
    pub fn parse(body: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_str(body).map_err(EnvelopeError::Malformed)?;

        let invalid = |source| EnvelopeError::InvalidPayload {
            kind: raw.kind.clone(),
            source,
        };

        match raw.kind.as_str() {
            TYPE_NOTIFICATION => serde_json::from_value(raw.data.clone())
                .map(ServerEvent::Notification)
                .map_err(invalid),
            TYPE_NOTIFICATION_COUNT => {
                // A count envelope without data still means "zero unread".
                let data = if raw.data.is_null() {
                    Value::Object(Default::default())
                } else {
                    raw.data.clone()
                };
                serde_json::from_value(data)
                    .map(ServerEvent::NotificationCount)
                    .map_err(invalid)
            }
            TYPE_CONNECTION_STATUS => Ok(ServerEvent::ConnectionStatus(raw.data)),
            TYPE_ERROR => Ok(ServerEvent::Error(raw.data)),
            other => Err(EnvelopeError::UnknownType(other.to_string())),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerEvent::Notification(_) => TYPE_NOTIFICATION,
            ServerEvent::NotificationCount(_) => TYPE_NOTIFICATION_COUNT,
            ServerEvent::ConnectionStatus(_) => TYPE_CONNECTION_STATUS,
            ServerEvent::Error(_) => TYPE_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn notification_envelope_defaults_unread() {
        let body = r#"{"type":"NOTIFICATION","data":{"id":17,"title":"Enrollment approved","message":"Group 3B"}}"#;
        let now = Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap();

        let ServerEvent::Notification(payload) = ServerEvent::parse(body).unwrap() else {
            panic!("expected a notification envelope");
        };
        let record = payload.into_record(now);
        assert_eq!(record.id.as_str(), "17");
        assert!(!record.read);
        assert!(record.read_at.is_none());
        assert_eq!(record.created_at, now);
    }

    #[test]
    fn read_notification_without_timestamp_gets_one() {
        let body = r#"{"type":"NOTIFICATION","data":{"id":"a","read":true}}"#;
        let now = Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap();
        let ServerEvent::Notification(payload) = ServerEvent::parse(body).unwrap() else {
            panic!("expected a notification envelope");
        };
        assert_eq!(payload.into_record(now).read_at, Some(now));
    }

    #[test]
    fn count_envelope_defaults_to_zero() {
        for body in [
            r#"{"type":"NOTIFICATION_COUNT","data":{}}"#,
            r#"{"type":"NOTIFICATION_COUNT"}"#,
        ] {
            match ServerEvent::parse(body).unwrap() {
                ServerEvent::NotificationCount(count) => assert_eq!(count.value(), 0),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn unknown_and_malformed_envelopes_are_errors() {
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"UNKNOWN","data":{}}"#),
            Err(EnvelopeError::UnknownType(t)) if t == "UNKNOWN"
        ));
        assert!(matches!(
            ServerEvent::parse("not json"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"NOTIFICATION","data":{"title":"no id"}}"#),
            Err(EnvelopeError::InvalidPayload { .. })
        ));
    }
}
