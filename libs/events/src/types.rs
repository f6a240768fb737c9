//! Event type names and payload definitions.
//!
//! Payloads are versioned through `NewEvent::event_version`; every payload
//! here is version 1.

use berth_id::{AppId, ChannelId, RevisionId, UserId};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Application
    pub const APP_CREATED: &str = "app.created";
    pub const APP_STORAGE_CHANGED: &str = "app.storage_changed";
    pub const APP_COLLABORATOR_ADDED: &str = "app.collaborator_added";
    pub const APP_COLLABORATOR_REMOVED: &str = "app.collaborator_removed";
    pub const APP_DELETED: &str = "app.deleted";

    // Revision
    pub const REVISION_REGISTERED: &str = "revision.registered";
    pub const REVISION_DELETED: &str = "revision.deleted";

    // Channel
    pub const CHANNEL_CREATED: &str = "channel.created";
    pub const CHANNEL_EDITED: &str = "channel.edited";
    pub const CHANNEL_ACTIVE_REVISION_CHANGED: &str = "channel.active_revision_changed";
    pub const CHANNEL_DELETED: &str = "channel.deleted";

    pub const ALL: &[&str] = &[
        APP_CREATED,
        APP_STORAGE_CHANGED,
        APP_COLLABORATOR_ADDED,
        APP_COLLABORATOR_REMOVED,
        APP_DELETED,
        REVISION_REGISTERED,
        REVISION_DELETED,
        CHANNEL_CREATED,
        CHANNEL_EDITED,
        CHANNEL_ACTIVE_REVISION_CHANGED,
        CHANNEL_DELETED,
    ];
}

/// Checks that an event type name is one this crate defines.
pub fn ensure_known_event_type(event_type: &str) -> Result<(), EventError> {
    if event_types::ALL.contains(&event_type) {
        Ok(())
    } else {
        Err(EventError::UnknownEventType(event_type.to_string()))
    }
}

// =============================================================================
// Shared Enums
// =============================================================================

/// How a channel picks its active revision, as persisted and audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    UseSpecifiedRevision,
    UseRangeRule,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStrategy::UseSpecifiedRevision => write!(f, "use_specified_revision"),
            SelectionStrategy::UseRangeRule => write!(f, "use_range_rule"),
        }
    }
}

impl std::str::FromStr for SelectionStrategy {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "use_specified_revision" => Ok(SelectionStrategy::UseSpecifiedRevision),
            "use_range_rule" => Ok(SelectionStrategy::UseRangeRule),
            other => Err(EventError::InvalidPayload {
                event_type: "selection_strategy".to_string(),
                reason: format!("unknown strategy '{other}'"),
            }),
        }
    }
}

/// Why a channel's active revision was recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionChangeReason {
    ChannelCreated,
    ChannelEdited,
    RevisionRegistered,
    RevisionDeleted,
    Repair,
}

impl std::fmt::Display for RevisionChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RevisionChangeReason::ChannelCreated => "channel_created",
            RevisionChangeReason::ChannelEdited => "channel_edited",
            RevisionChangeReason::RevisionRegistered => "revision_registered",
            RevisionChangeReason::RevisionDeleted => "revision_deleted",
            RevisionChangeReason::Repair => "repair",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Application Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCreatedPayload {
    pub app_id: AppId,
    pub name: String,
    pub storage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStorageChangedPayload {
    pub app_id: AppId,
    pub previous: String,
    pub storage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCollaboratorPayload {
    pub app_id: AppId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDeletedPayload {
    pub app_id: AppId,
    pub name: String,
    pub revision_count: usize,
    pub channel_count: usize,
}

// =============================================================================
// Revision Payloads
// =============================================================================

/// Payload for both `revision.registered` and `revision.deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPayload {
    pub revision_id: RevisionId,
    pub app_id: AppId,
    pub number: String,
}

// =============================================================================
// Channel Payloads
// =============================================================================

/// Payload for `channel.created` and `channel.edited`.
///
/// Environment values are not recorded, only their keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfiguredPayload {
    pub channel_id: ChannelId,
    pub app_id: AppId,
    pub name: String,
    pub strategy: SelectionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specified_revision_id: Option<RevisionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_rule: Option<String>,
    pub env_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelActiveRevisionChangedPayload {
    pub channel_id: ChannelId,
    pub app_id: AppId,
    pub changed_from: Option<RevisionId>,
    pub changed_to: Option<RevisionId>,
    pub reason: RevisionChangeReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDeletedPayload {
    pub channel_id: ChannelId,
    pub app_id: AppId,
    pub name: String,
}
