use crate::error::RelayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker the enricher stamps onto every message it forwards.
pub const ENRICHED_BY: &str = "consumer";

/// The record carried through the pipeline.
///
/// `id`, `content` and `timestamp` are fixed at creation. Later stages build a
/// new value instead of mutating the one they received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub enriched_by: Option<String>,
}

impl Message {
    /// Build a fresh, not yet enriched message with a random id and the current time.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            enriched_by: None,
        }
    }

    /// Copy of this message with `enriched_by` set to `marker`.
    #[must_use]
    pub fn enriched(&self, marker: &str) -> Self {
        Self {
            id: self.id.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            enriched_by: Some(marker.to_string()),
        }
    }

    /// Encode into the JSON wire format.
    ///
    /// # Errors
    /// Returns `RelayError::MalformedMessage` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a JSON body received from the broker.
    ///
    /// # Errors
    /// Returns `RelayError::MalformedMessage` when the body does not match the
    /// wire schema.
    pub fn decode(data: &[u8]) -> Result<Self, RelayError> {
        Ok(serde_json::from_slice(data)?)
    }
}

mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    /// RFC 3339, or an offset-less local date-time (as Java's `LocalDateTime`
    /// writes it) read as UTC.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>()
            .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M"))
            .map(|naive| naive.and_utc())
            .map_err(|e| D::Error::custom(format!("invalid timestamp '{raw}': {e}")))
    }
}
