//! Notification data models as exchanged with the academia backend.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Server-assigned notification identifier.
///
/// The backend emits numeric ids on some endpoints and string ids on others,
/// so both are accepted and kept in their canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for NotificationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Signed(n) => Self(n.to_string()),
            RawId::Unsigned(n) => Self(n.to_string()),
        })
    }
}

/// Display category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    #[serde(alias = "INFO")]
    Info,
    #[serde(alias = "WARNING")]
    Warning,
    #[serde(alias = "DANGER")]
    Danger,
    #[serde(alias = "SUCCESS")]
    Success,
    #[serde(other)]
    Other,
}

/// A single notification owned by the signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
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
    pub read: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl NotificationRecord {
    /// Mark as read. Keeps an existing `read_at` when the record was already read.
    pub fn mark_read(&mut self, at: DateTime<Utc>) {
        if !self.read || self.read_at.is_none() {
            self.read_at = Some(at);
        }
        self.read = true;
    }

    pub fn mark_unread(&mut self) {
        self.read = false;
        self.read_at = None;
    }

    /// Bring `read_at` in line with `read`, stamping `now` if a read record
    /// arrived without a timestamp.
    pub fn normalize_read_state(&mut self, now: DateTime<Utc>) {
        if self.read {
            if self.read_at.is_none() {
                self.read_at = Some(now);
            }
        } else {
            self.read_at = None;
        }
    }
}

/// Partial update merged into a stored record.
///
/// Double options distinguish "leave as is" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPatch {
    pub kind: Option<NotificationKind>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub read: Option<bool>,
    pub read_at: Option<Option<DateTime<Utc>>>,
    pub route: Option<Option<String>>,
    pub json: Option<Option<serde_json::Value>>,
}

impl NotificationPatch {
    pub fn mark_read(at: DateTime<Utc>) -> Self {
        Self {
            read: Some(true),
            read_at: Some(Some(at)),
            ..Default::default()
        }
    }

    pub fn mark_unread() -> Self {
        Self {
            read: Some(false),
            read_at: Some(None),
            ..Default::default()
        }
    }

    /// Patch that puts every mutable field back to the state of `record`.
    pub fn restore(record: &NotificationRecord) -> Self {
        Self {
            kind: Some(record.kind),
            title: Some(record.title.clone()),
            message: Some(record.message.clone()),
            read: Some(record.read),
            read_at: Some(record.read_at),
            route: Some(record.route.clone()),
            json: Some(record.json.clone()),
        }
    }
}

/// Body of the unread-count endpoint and of `NOTIFICATION_COUNT` envelopes.
///
/// Older endpoints answer `{ "count": n }`, newer ones `{ "unreadCount": n }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    #[serde(default, alias = "count")]
    pub unread_count: Option<i64>,
}

impl UnreadCount {
    /// Count clamped to zero; absent counts read as zero.
    pub fn value(&self) -> u64 {
        self.unread_count.unwrap_or(0).max(0) as u64
    }
}

/// Timestamp parsing that tolerates the zone-less `LocalDateTime` strings
/// some backend endpoints still emit. Those are taken as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}
