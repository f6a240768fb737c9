//! Event envelope - the common wrapper for all audit events.

use berth_id::{AppId, EventId, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EventError;

/// Actor type for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human operator acting through the admin surface.
    User,
    /// The system itself (registration hooks, repair passes).
    #[default]
    System,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for ActorType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ActorType::User),
            "system" => Ok(ActorType::System),
            other => Err(EventError::InvalidPayload {
                event_type: "actor_type".to_string(),
                reason: format!("unknown actor type '{other}'"),
            }),
        }
    }
}

/// Aggregate type an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    #[default]
    App,
    Revision,
    Channel,
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AggregateType::App => "app",
            AggregateType::Revision => "revision",
            AggregateType::Channel => "channel",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AggregateType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(AggregateType::App),
            "revision" => Ok(AggregateType::Revision),
            "channel" => Ok(AggregateType::Channel),
            other => Err(EventError::InvalidPayload {
                event_type: "aggregate_type".to_string(),
                reason: format!("unknown aggregate type '{other}'"),
            }),
        }
    }
}

/// A committed audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally monotonic event identifier.
    pub event_id: EventId,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    pub aggregate_type: AggregateType,

    /// The ID of the aggregate instance (prefixed string form).
    pub aggregate_id: String,

    /// The event type (e.g. "channel.edited").
    pub event_type: String,

    /// Schema version for this event type.
    pub event_version: i32,

    pub actor_type: ActorType,
    pub actor_id: String,

    /// Request correlation ID for tracing.
    pub request_id: RequestId,

    /// Application every berth event is scoped to.
    pub app_id: AppId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Event ID of the event that caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,

    /// Human-readable summary for audit readers.
    pub description: String,

    pub payload: serde_json::Value,
}

/// An event recorded during an edit, not yet assigned an `EventId`.
///
/// `causation` is the index of an earlier event in the same batch. The store
/// resolves it to that event's `EventId` when the batch is appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub occurred_at: DateTime<Utc>,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_version: i32,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub request_id: RequestId,
    pub app_id: AppId,
    pub correlation_id: Option<String>,
    pub causation: Option<usize>,
    pub description: String,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn builder() -> NewEventBuilder {
        NewEventBuilder::new()
    }

    /// Turns this event into a committed envelope.
    pub fn into_envelope(self, event_id: EventId, causation_id: Option<EventId>) -> EventEnvelope {
        EventEnvelope {
            event_id,
            occurred_at: self.occurred_at,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            event_version: self.event_version,
            actor_type: self.actor_type,
            actor_id: self.actor_id,
            request_id: self.request_id,
            app_id: self.app_id,
            correlation_id: self.correlation_id,
            causation_id,
            description: self.description,
            payload: self.payload,
        }
    }
}

/// Checks that every causation index in a batch points at an earlier event.
pub fn validate_causation(events: &[NewEvent]) -> Result<(), EventError> {
    for (index, event) in events.iter().enumerate() {
        if let Some(cause) = event.causation {
            if cause >= index {
                return Err(EventError::InvalidCausation { index, cause });
            }
        }
    }
    Ok(())
}

/// Builder for constructing new events.
#[derive(Debug, Default)]
pub struct NewEventBuilder {
    occurred_at: Option<DateTime<Utc>>,
    aggregate_type: Option<AggregateType>,
    aggregate_id: Option<String>,
    event_type: Option<String>,
    event_version: Option<i32>,
    actor_type: Option<ActorType>,
    actor_id: Option<String>,
    request_id: Option<RequestId>,
    app_id: Option<AppId>,
    correlation_id: Option<String>,
    causation: Option<usize>,
    description: Option<String>,
    payload: Option<serde_json::Value>,
}

impl NewEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }

    pub fn aggregate(mut self, agg_type: AggregateType, agg_id: impl Into<String>) -> Self {
        self.aggregate_type = Some(agg_type);
        self.aggregate_id = Some(agg_id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn event_version(mut self, version: i32) -> Self {
        self.event_version = Some(version);
        self
    }

    pub fn actor(mut self, actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        self.actor_type = Some(actor_type);
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn app_id(mut self, app_id: AppId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    pub fn correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn caused_by(mut self, index: Option<usize>) -> Self {
        self.causation = index;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Serializes a typed payload into the event.
    pub fn payload<P: Serialize>(mut self, payload: &P) -> Result<Self, EventError> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn build(self) -> Result<NewEvent, EventError> {
        Ok(NewEvent {
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            aggregate_type: self
                .aggregate_type
                .ok_or(EventError::MissingField("aggregate_type"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(EventError::MissingField("aggregate_id"))?,
            event_type: self
                .event_type
                .ok_or(EventError::MissingField("event_type"))?,
            event_version: self.event_version.unwrap_or(1),
            actor_type: self.actor_type.ok_or(EventError::MissingField("actor"))?,
            actor_id: self.actor_id.ok_or(EventError::MissingField("actor"))?,
            request_id: self
                .request_id
                .ok_or(EventError::MissingField("request_id"))?,
            app_id: self.app_id.ok_or(EventError::MissingField("app_id"))?,
            correlation_id: self.correlation_id,
            causation: self.causation,
            description: self.description.unwrap_or_default(),
            payload: self.payload.ok_or(EventError::MissingField("payload"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(causation: Option<usize>) -> NewEvent {
        NewEvent::builder()
            .aggregate(AggregateType::Channel, "chan_01HV4Z2WQXKJNM8GPQY6VBKC3D")
            .event_type("channel.edited")
            .actor(ActorType::User, "usr_123")
            .request_id(RequestId::new())
            .app_id(AppId::new())
            .caused_by(causation)
            .payload(&serde_json::json!({"name": "stable"}))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_actor_type_serialization() {
        assert_eq!(serde_json::to_string(&ActorType::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&ActorType::System).unwrap(),
            "\"system\""
        );
        assert_eq!("user".parse::<ActorType>().unwrap(), ActorType::User);
        assert!("robot".parse::<ActorType>().is_err());
    }

    #[test]
    fn test_aggregate_type_display_parse_agree() {
        for agg in [AggregateType::App, AggregateType::Revision, AggregateType::Channel] {
            assert_eq!(agg.to_string().parse::<AggregateType>().unwrap(), agg);
        }
    }

    #[test]
    fn test_builder_defaults() {
        let event = sample(None);
        assert_eq!(event.event_type, "channel.edited");
        assert_eq!(event.event_version, 1);
        assert_eq!(event.aggregate_type, AggregateType::Channel);
        assert!(event.description.is_empty());
    }

    #[test]
    fn test_builder_missing_field() {
        let err = NewEvent::builder()
            .event_type("channel.edited")
            .build()
            .unwrap_err();
        assert!(matches!(err, EventError::MissingField("aggregate_type")));
    }

    #[test]
    fn test_causation_must_point_backwards() {
        assert!(validate_causation(&[sample(None), sample(Some(0))]).is_ok());
        let err = validate_causation(&[sample(Some(0))]).unwrap_err();
        assert!(matches!(err, EventError::InvalidCausation { index: 0, cause: 0 }));
    }

    #[test]
    fn test_into_envelope_keeps_fields() {
        let event = sample(None);
        let app_id = event.app_id;
        let envelope = event.into_envelope(EventId::new(7), Some(EventId::new(6)));
        assert_eq!(envelope.event_id.value(), 7);
        assert_eq!(envelope.causation_id, Some(EventId::new(6)));
        assert_eq!(envelope.app_id, app_id);
    }
}
