//! Explicit per-operation context.

use berth_events::ActorType;
use berth_id::RequestId;
use tokio_util::sync::CancellationToken;

/// Who started an operation, how to correlate it, and how to cancel it.
///
/// Passed to every edit so recorded events and log lines carry the origin
/// without any ambient state.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub request_id: RequestId,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub correlation_id: Option<String>,
    /// Cancels pending reschedule enqueues. Never fires unless the caller does.
    pub cancel: CancellationToken,
}

impl OpContext {
    pub fn user(actor_id: impl Into<String>) -> Self {
        Self::new(ActorType::User, actor_id)
    }

    pub fn system() -> Self {
        Self::new(ActorType::System, "system")
    }

    fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            actor_type,
            actor_id: actor_id.into(),
            correlation_id: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
