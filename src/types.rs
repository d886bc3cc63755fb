//! Core types for the event feed.

use crate::error::{FeedError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the customer or journey a buffer is scoped to.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl SubjectId {
    /// Create a subject id.
    pub fn new(id: impl Into<String>) -> Self {
        SubjectId(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectId({})", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        SubjectId(s.to_string())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_micros())
    }

    /// Parse an ISO-8601 string.
    ///
    /// Accepts RFC 3339 with an offset, a date-time without offset (read as
    /// UTC) and a bare calendar date.
    pub fn parse_iso8601(s: &str) -> Option<Self> {
        let s = s.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Self::from_datetime(dt.with_timezone(&Utc)));
        }

        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Some(Self::from_datetime(naive.and_utc()));
            }
        }

        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Self::from_datetime(naive.and_utc()))
    }

    /// Convert a UTC datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp_micros())
    }

    /// Convert back to a calendar time. `None` if out of chrono's range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = self.0.div_euclid(1_000_000);
        let nanos = (self.0.rem_euclid(1_000_000) * 1_000) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Event record as delivered by the backend, before normalization.
///
/// Mirrors the CloudEvents-style journey record. Unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub event_type: String,

    /// ISO-8601 event time.
    #[serde(default)]
    pub time: Option<String>,

    #[serde(default)]
    pub person: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub specversion: Option<String>,

    #[serde(default)]
    pub datacontenttype: Option<String>,

    #[serde(default)]
    pub data: Option<serde_json::Value>,

    /// Why the record could not be decoded. Such records are rejected
    /// during normalization instead of being lost silently.
    #[serde(skip)]
    pub decode_error: Option<String>,
}

impl RawEvent {
    /// Create a raw event with the fields the buffer cares about.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            time: Some(time.into()),
            ..Default::default()
        }
    }

    /// Attach a payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach the person identifier.
    pub fn with_person(mut self, person: impl Into<String>) -> Self {
        self.person = Some(person.into());
        self
    }

    /// A record that failed to decode, kept so it can be reported.
    pub fn undecodable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            decode_error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Decode one live-feed message body.
    ///
    /// The feed interleaves bare keep-alive timestamps with event objects.
    /// Bodies that are not JSON objects yield `None`. An object that does not
    /// match the event schema yields an [undecodable](Self::undecodable)
    /// record.
    pub fn from_message(body: &str) -> Option<Self> {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value @ serde_json::Value::Object(_)) => Some(Self::from_value(value)),
            _ => None,
        }
    }

    /// Decode a historic page (a JSON array of events).
    ///
    /// Only a body that is not an array fails. Elements that do not match
    /// the event schema come back as undecodable records.
    pub fn page_from_json(body: &str) -> Result<Vec<Self>> {
        let values: Vec<serde_json::Value> = serde_json::from_str(body)?;
        Ok(values.into_iter().map(Self::from_value).collect())
    }

    /// Decode one JSON record.
    pub fn from_value(value: serde_json::Value) -> Self {
        let id = record_id(&value);
        match serde_json::from_value::<RawEvent>(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(event_id = %id, error = %e, "undecodable event record");
                Self::undecodable(id, e.to_string())
            }
        }
    }
}

fn record_id(value: &serde_json::Value) -> String {
    match value.get("id") {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// A normalized customer interaction event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub timestamp: Timestamp,

    /// Person identifier, omitted for anonymous visitors.
    pub person: Option<String>,

    pub source: Option<String>,

    /// Opaque payload, passed through unmodified.
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event directly from parsed parts.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            timestamp,
            person: None,
            source: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Normalize a raw record. Fails when the record was undecodable or
    /// `time` is missing or malformed.
    pub fn from_raw(raw: RawEvent) -> Result<Self> {
        if let Some(reason) = raw.decode_error {
            return Err(FeedError::parse(raw.id, reason));
        }

        let time = raw
            .time
            .as_deref()
            .ok_or_else(|| FeedError::parse(&raw.id, "missing time"))?;
        let timestamp = Timestamp::parse_iso8601(time)
            .ok_or_else(|| FeedError::parse(&raw.id, format!("invalid timestamp {time:?}")))?;

        let person = raw.person.filter(|p| !p.contains("anon"));

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            timestamp,
            person,
            source: raw.source,
            payload: raw.data.unwrap_or(serde_json::Value::Null),
        })
    }

    /// Display title: the type followed by the first payload key, if any.
    pub fn title(&self) -> String {
        match self.payload.as_object().and_then(|map| map.keys().next()) {
            Some(key) => format!("{}: {}", self.event_type, key),
            None => self.event_type.clone(),
        }
    }
}

/// Normalize a batch, dropping malformed records.
///
/// Returns the accepted events in input order together with the diagnostics
/// for every dropped record.
pub fn normalize_batch(raws: Vec<RawEvent>) -> (Vec<Event>, Vec<FeedError>) {
    let mut events = Vec::with_capacity(raws.len());
    let mut rejected = Vec::new();

    for raw in raws {
        match Event::from_raw(raw) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed event");
                rejected.push(e);
            }
        }
    }

    (events, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let a = Timestamp::parse_iso8601("2021-03-01T10:00:00Z").unwrap();
        let b = Timestamp::parse_iso8601("2021-03-01T12:00:00+02:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_without_offset_and_date_only() {
        let naive = Timestamp::parse_iso8601("2021-03-01T00:00:00.250").unwrap();
        let date = Timestamp::parse_iso8601("2021-03-01").unwrap();
        assert_eq!(naive.0 - date.0, 250_000);
        assert!(Timestamp::parse_iso8601("2021-03-01T10:15").is_some());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Timestamp::parse_iso8601("yesterday").is_none());
        assert!(Timestamp::parse_iso8601("").is_none());
    }

    #[test]
    fn test_timestamp_datetime_roundtrip() {
        let ts = Timestamp::parse_iso8601("2020-02-29T23:59:59.123456Z").unwrap();
        assert_eq!(Timestamp::from_datetime(ts.to_datetime().unwrap()), ts);
    }

    #[test]
    fn test_from_raw_filters_anonymous_person() {
        let raw = RawEvent::new("e1", "Page Visit", "2021-03-01T10:00:00Z").with_person("anon_42");
        let event = Event::from_raw(raw).unwrap();
        assert_eq!(event.person, None);

        let raw = RawEvent::new("e2", "Page Visit", "2021-03-01T10:00:00Z").with_person("jane@x.io");
        let event = Event::from_raw(raw).unwrap();
        assert_eq!(event.person.as_deref(), Some("jane@x.io"));
    }

    #[test]
    fn test_from_raw_missing_time() {
        let raw = RawEvent {
            id: "e1".into(),
            ..Default::default()
        };
        let err = Event::from_raw(raw).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_message_decoding_skips_keepalive() {
        assert!(RawEvent::from_message("1614592800000").is_none());
        assert!(RawEvent::from_message("not json").is_none());

        let raw = RawEvent::from_message(
            r#"{"id":"e1","type":"Quote","time":"2021-03-01T10:00:00Z","data":{"amount":3},"extra":1}"#,
        )
        .unwrap();
        assert_eq!(raw.event_type, "Quote");
        assert_eq!(raw.data, Some(json!({"amount": 3})));
    }

    #[test]
    fn test_mistyped_message_is_reported() {
        let raw = RawEvent::from_message(r#"{"id":"e1","type":"Quote","time":1614592800000}"#)
            .expect("object bodies are not keep-alives");
        assert!(raw.decode_error.is_some());

        match Event::from_raw(raw).unwrap_err() {
            FeedError::Parse { event_id, .. } => assert_eq!(event_id, "e1"),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_page_keeps_good_records_next_to_bad_ones() {
        let page = RawEvent::page_from_json(
            r#"[{"id":"a","type":"Login","time":"2021-03-01T10:00:00Z"},{"id":7,"type":"Login","time":"2021-03-02T10:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(page.len(), 2);

        let (events, rejected) = normalize_batch(page);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "a");
        assert!(matches!(&rejected[0], FeedError::Parse { event_id, .. } if event_id == "7"));
    }

    #[test]
    fn test_title_uses_first_payload_key() {
        let raw = RawEvent::new("e1", "Quote", "2021-03-01T10:00:00Z").with_data(json!({"amount": 3}));
        assert_eq!(Event::from_raw(raw).unwrap().title(), "Quote: amount");

        let bare = Event::new("e2", "Login", Timestamp(0));
        assert_eq!(bare.title(), "Login");
    }

    #[test]
    fn test_normalize_batch_keeps_good_events() {
        let raws = vec![
            RawEvent::new("a", "t", "2021-03-01T10:00:00Z"),
            RawEvent::new("b", "t", "not-a-time"),
            RawEvent::new("c", "t", "2021-03-02T10:00:00Z"),
        ];
        let (events, rejected) = normalize_batch(raws);
        assert_eq!(events.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), ["a", "c"]);
        assert_eq!(rejected.len(), 1);
    }
}
