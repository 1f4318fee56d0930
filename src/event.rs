//! Published event model and validation.
//!
//! An [`Event`] is identified by its [`EventKey`], the `(topic, event_id)`
//! pair that the store deduplicates on. Everything else is carried through
//! untouched: the payload is an opaque JSON object.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Naive date-time layouts accepted when the publisher omits an offset.
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Reasons an incoming event is rejected before it reaches the queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    /// A required string field is present but empty.
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// The timestamp is neither RFC 3339 nor a naive ISO-8601 date-time.
    #[error("invalid timestamp: '{0}'")]
    InvalidTimestamp(String),

    /// The document does not have the shape of an event.
    #[error("malformed event{}: {message}", at_index(.index))]
    Malformed {
        index: Option<usize>,
        message: String,
    },
}

fn at_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" at index {i}")).unwrap_or_default()
}

/// Dedup key of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub topic: String,
    pub event_id: String,
}

impl EventKey {
    pub fn new(topic: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event_id: event_id.into(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.event_id)
    }
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Logical stream the event belongs to.
    pub topic: String,
    /// Publisher-assigned identifier, unique within a topic.
    pub event_id: String,
    /// When the event happened according to the publisher (UTC).
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Identifier of the publishing system.
    pub source: String,
    /// Opaque structured document.
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event with the given key and payload.
    pub fn new(
        topic: impl Into<String>,
        event_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event_id: event_id.into(),
            timestamp,
            source: source.into(),
            payload,
        }
    }

    /// The `(topic, event_id)` pair used for deduplication.
    pub fn key(&self) -> EventKey {
        EventKey::new(&self.topic, &self.event_id)
    }

    /// Check field-level constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), EventError> {
        for (name, value) in [
            ("topic", &self.topic),
            ("event_id", &self.event_id),
            ("source", &self.source),
        ] {
            if value.is_empty() {
                return Err(EventError::EmptyField(name));
            }
        }
        Ok(())
    }

    /// Decode and validate a request body holding one event or a list of events.
    ///
    /// The whole body is rejected on the first invalid event, so a batch is
    /// either accepted entirely or not at all.
    pub fn batch_from_value(body: Value) -> Result<Vec<Self>, EventError> {
        match body {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| Self::from_value(item, Some(i)))
                .collect(),
            single => Ok(vec![Self::from_value(single, None)?]),
        }
    }

    fn from_value(value: Value, index: Option<usize>) -> Result<Self, EventError> {
        let event: Self = serde_json::from_value(value).map_err(|e| EventError::Malformed {
            index,
            message: e.to_string(),
        })?;
        event.validate()?;
        Ok(event)
    }
}

/// Parse a publisher timestamp.
///
/// Accepts RFC 3339 with any offset (normalized to UTC) and naive ISO-8601
/// date-times, which are taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EventError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| EventError::InvalidTimestamp(raw.to_string()))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "topic": "t1",
            "event_id": "a",
            "timestamp": "2025-01-01T00:00:00Z",
            "source": "s",
            "payload": {"v": 1}
        })
    }

    #[test]
    fn test_single_event_decodes() {
        let events = Event::batch_from_value(sample()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key(), EventKey::new("t1", "a"));
        assert_eq!(
            events[0].timestamp,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(events[0].payload["v"], json!(1));
    }

    #[test]
    fn test_batch_decodes_in_order() {
        let mut second = sample();
        second["event_id"] = json!("b");
        let events = Event::batch_from_value(json!([sample(), second])).unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_empty_batch_is_valid() {
        assert!(Event::batch_from_value(json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_missing_event_id_is_malformed() {
        let mut body = sample();
        body.as_object_mut().unwrap().remove("event_id");
        let err = Event::batch_from_value(body).unwrap_err();
        assert!(matches!(err, EventError::Malformed { index: None, .. }));
        assert!(err.to_string().contains("event_id"));
    }

    #[test]
    fn test_missing_payload_is_malformed() {
        let mut body = sample();
        body.as_object_mut().unwrap().remove("payload");
        assert!(Event::batch_from_value(body).is_err());
    }

    #[test]
    fn test_non_object_payload_is_malformed() {
        let mut body = sample();
        body["payload"] = json!([1, 2, 3]);
        assert!(Event::batch_from_value(body).is_err());
    }

    #[test]
    fn test_empty_fields_rejected() {
        for field in ["topic", "event_id", "source"] {
            let mut body = sample();
            body[field] = json!("");
            assert_eq!(
                Event::batch_from_value(body).unwrap_err(),
                EventError::EmptyField(field)
            );
        }
    }

    #[test]
    fn test_whitespace_fields_accepted() {
        let mut body = sample();
        body["topic"] = json!(" ");
        body["event_id"] = json!("\t");
        let events = Event::batch_from_value(body).unwrap();
        assert_eq!(events[0].topic, " ");
        assert_eq!(events[0].event_id, "\t");
    }

    #[test]
    fn test_invalid_entry_reports_index() {
        let mut bad = sample();
        bad["timestamp"] = json!("yesterday");
        let err = Event::batch_from_value(json!([sample(), bad])).unwrap_err();
        assert!(matches!(err, EventError::Malformed { index: Some(1), .. }));
        assert!(err.to_string().contains("at index 1"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 10, 20, 17, 50, 0).unwrap();
        assert_eq!(parse_timestamp("2025-10-20T17:50:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-10-20T19:50:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-10-20T17:50:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-10-20 17:50:00").unwrap(), expected);
        assert!(parse_timestamp("2025-10-20T17:50:00.123456").is_ok());
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(matches!(
            parse_timestamp("not a date"),
            Err(EventError::InvalidTimestamp(_))
        ));
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(EventKey::new("orders", "42").to_string(), "orders/42");
    }
}
