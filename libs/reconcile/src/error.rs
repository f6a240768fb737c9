//! Errors surfaced by edit operations.

use berth_env_format::EnvFormatError;
use berth_events::EventError;
use berth_id::AppId;
use thiserror::Error;

use crate::engine::ReevaluateErrors;
use crate::ledger::LedgerError;
use crate::notifier::NotifyError;
use crate::rule::RuleError;
use crate::selector::ResolveError;
use crate::store::StoreError;
use crate::version::VersionError;

/// Input rejected before anything was mutated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no selection strategy chosen")]
    NoStrategySelected,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid environment: {0}")]
    InvalidEnvironment(#[from] EnvFormatError),

    #[error("invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("a channel named '{name}' already exists")]
    DuplicateChannelName { name: String },

    #[error("invalid name: {reason}")]
    InvalidName { reason: String },
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("invalid range rule: {0}")]
    InvalidRule(#[from] RuleError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("revision {number} already exists")]
    DuplicateRevision { number: String },

    #[error(transparent)]
    InvalidRevisionNumber(#[from] VersionError),

    /// Another edit committed first. The caller may reload and retry.
    #[error("application {app_id} was modified concurrently")]
    Conflict { app_id: AppId },

    /// The edit is committed but some reschedules were not enqueued.
    #[error("reschedule notification failed: {0}")]
    Notification(#[from] NotifyError),

    #[error(transparent)]
    Reevaluate(#[from] ReevaluateErrors),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to record event: {0}")]
    Event(#[from] EventError),
}

impl EditError {
    pub(crate) fn not_found(what: &'static str, id: impl ToString) -> Self {
        EditError::NotFound {
            what,
            id: id.to_string(),
        }
    }

    /// True when the caller's input is at fault and retrying as-is is pointless.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EditError::NotFound { .. }
                | EditError::InvalidRule(_)
                | EditError::Validation(_)
                | EditError::DuplicateRevision { .. }
                | EditError::InvalidRevisionNumber(_)
        )
    }

    /// Stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EditError::NotFound { .. } => "not_found",
            EditError::InvalidRule(_) => "invalid_rule",
            EditError::Validation(_) => "validation",
            EditError::DuplicateRevision { .. } => "duplicate_revision",
            EditError::InvalidRevisionNumber(_) => "invalid_revision_number",
            EditError::Conflict { .. } => "conflict",
            EditError::Notification(NotifyError::Cancelled { .. }) => "cancelled",
            EditError::Notification(_) => "notification_failure",
            EditError::Reevaluate(_) => "reevaluate",
            EditError::Store(_) => "store",
            EditError::Event(_) => "event",
        }
    }
}

impl From<LedgerError> for EditError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::DuplicateRevision { number } => EditError::DuplicateRevision { number },
            other @ LedgerError::ForeignRevision { .. } => EditError::Store(StoreError::Corrupt {
                what: "revision".to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

impl From<EnvFormatError> for EditError {
    fn from(err: EnvFormatError) -> Self {
        EditError::Validation(ValidationError::InvalidEnvironment(err))
    }
}

impl From<ResolveError> for ReevaluateErrors {
    fn from(err: ResolveError) -> Self {
        let channel_id = match &err {
            ResolveError::ForeignChannel { channel_id, .. } => *channel_id,
        };
        ReevaluateErrors {
            changes: Vec::new(),
            failures: vec![crate::engine::ChannelFailure {
                channel_id,
                error: err,
            }],
        }
    }
}
