//! Error types for the event feed.

use thiserror::Error;

/// Main error type for feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Failed to fetch journey: {0}")]
    Fetch(String),

    #[error("Live feed dropped: {0}")]
    Channel(String),

    #[error("Malformed event {event_id}: {reason}")]
    Parse { event_id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl FeedError {
    /// Build a parse error for the given event.
    pub fn parse(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        FeedError::Parse {
            event_id: event_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error only affects a single event.
    pub fn is_parse(&self) -> bool {
        matches!(self, FeedError::Parse { .. })
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
