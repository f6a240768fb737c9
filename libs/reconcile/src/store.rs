//! Persistence seam for the application aggregate.
//!
//! Writes are optimistic: every guarded row carries the version the caller
//! read, and the store answers with a [`CommitResult`] instead of an error
//! when another writer got there first.

use async_trait::async_trait;
use berth_events::NewEvent;
use berth_id::{AppId, ChannelId, RevisionId, Version};
use thiserror::Error;

use crate::model::{Application, ApplicationRecord, Channel, Port, Revision};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    /// Stored data could not be turned back into the domain model.
    #[error("corrupt {what}: {reason}")]
    Corrupt { what: String, reason: String },
}

/// Outcome of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Success,
    /// A guarded version no longer matched; nothing was written.
    Conflict,
    /// The application no longer exists; nothing was written.
    NotFound,
}

impl CommitResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CommitResult::Success)
    }
}

/// What happens to the application row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppWrite {
    /// Row untouched; only asserts it exists at `expected`.
    Check { expected: Version },
    /// Insert a new application at [`Version::FIRST`].
    Create(ApplicationRecord),
    /// Overwrite fields and bump the version. Required whenever the ledger
    /// changes so concurrent ledger edits serialize.
    Update {
        record: ApplicationRecord,
        expected: Version,
    },
    /// Remove the application with its revisions and channels.
    Delete { expected: Version },
}

/// What happens to one channel row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelWrite {
    Insert(Channel),
    /// Overwrite the channel if its stored version is `expected`, then bump it.
    Update { channel: Channel, expected: Version },
    Delete {
        channel_id: ChannelId,
        expected: Version,
    },
    /// Row untouched; asserts the channel still exists at `expected`.
    ///
    /// Ledger writes guard every channel they reevaluated, so a channel
    /// edited concurrently cannot keep a revision resolved against the old
    /// ledger.
    Check {
        channel_id: ChannelId,
        expected: Version,
    },
}

impl ChannelWrite {
    pub fn update(channel: &Channel) -> Self {
        ChannelWrite::Update {
            channel: channel.clone(),
            expected: channel.version,
        }
    }

    pub fn check(channel: &Channel) -> Self {
        ChannelWrite::Check {
            channel_id: channel.id,
            expected: channel.version,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            ChannelWrite::Insert(channel) | ChannelWrite::Update { channel, .. } => channel.id,
            ChannelWrite::Delete { channel_id, .. } | ChannelWrite::Check { channel_id, .. } => {
                *channel_id
            }
        }
    }
}

/// One atomic unit of persistence: state changes plus the events that
/// describe them, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct Commit {
    pub app_id: AppId,
    pub app: AppWrite,
    pub revisions_added: Vec<Revision>,
    pub revisions_removed: Vec<RevisionId>,
    pub channels: Vec<ChannelWrite>,
    /// Events in causal order; `causation` indexes into this list.
    pub events: Vec<NewEvent>,
}

impl Commit {
    pub fn new(app_id: AppId, app: AppWrite) -> Self {
        Self {
            app_id,
            app,
            revisions_added: Vec::new(),
            revisions_removed: Vec::new(),
            channels: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<NewEvent>) -> Self {
        self.events = events;
        self
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Loads the full aggregate, or `None` if it does not exist.
    async fn load(&self, app_id: AppId) -> Result<Option<Application>, StoreError>;

    async fn list_applications(&self) -> Result<Vec<AppId>, StoreError>;

    /// Reserves a port no other channel holds.
    async fn next_port(&self) -> Result<Port, StoreError>;

    async fn commit(&self, commit: Commit) -> Result<CommitResult, StoreError>;
}
