//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when handling events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The event type is unknown.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload did not match the event type.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    /// A required envelope field was not set.
    #[error("missing required event field: {0}")]
    MissingField(&'static str),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A causation index pointed at an event that does not precede it.
    #[error("event {index} cannot be caused by event {cause}")]
    InvalidCausation { index: usize, cause: usize },
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
