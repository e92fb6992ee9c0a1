use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric account id as issued by the backend.
pub type UserId = i64;

/// Client-side bound on outgoing message length, in characters.
pub const MAX_CONTENT_CHARS: usize = 500;

/// A private message between two users.
///
/// The same shape travels over the realtime connection and comes back from
/// the history endpoint. History entries always carry an `id` and a
/// timestamp; live entries may lack both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    /// ISO-8601; the history endpoint names this field `createdAt`.
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed chat payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("chat payload has empty content")]
    EmptyContent,
    #[error("chat payload has invalid timestamp `{0}`")]
    InvalidTimestamp(String),
}

impl ChatMessage {
    /// Builds a locally originated message stamped with `now`.
    pub fn outgoing(
        sender_id: UserId,
        recipient_id: UserId,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            sender_id,
            recipient_id,
            content: content.into(),
            timestamp: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    /// Strictly decodes a frame body.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        serde_json::from_str::<Self>(body)?.validated()
    }

    /// Same rules as [`ChatMessage::decode`], for entries of a JSON array.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        serde_json::from_value::<Self>(value)?.validated()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn validated(self) -> Result<Self, DecodeError> {
        if self.content.trim().is_empty() {
            return Err(DecodeError::EmptyContent);
        }
        if let Some(raw) = &self.timestamp {
            if parse_timestamp(raw).is_none() {
                return Err(DecodeError::InvalidTimestamp(raw.clone()));
            }
        }
        Ok(self)
    }

    /// Parsed timestamp; `None` when absent or unreadable.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }

    /// True when this message travels between `a` and `b`, in either direction.
    pub fn belongs_to(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }
}

/// Accepts RFC 3339 as well as the zone-less form the backend emits for
/// persisted rows (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
