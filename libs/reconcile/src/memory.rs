//! In-memory store and queue for tests and local development.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use berth_events::{validate_causation, EventEnvelope};
use berth_id::{AppId, ChannelId, EventId, Version};
use tokio_util::sync::CancellationToken;

use crate::ledger::RevisionLedger;
use crate::model::{Application, ApplicationRecord, Channel, ChannelReference, Port, Revision};
use crate::notifier::{QueueError, TaskQueue};
use crate::store::{AppWrite, ApplicationStore, ChannelWrite, Commit, CommitResult, StoreError};

/// Default first port handed to channels.
pub const DEFAULT_PORT_RANGE_START: u16 = 20000;

type CommitHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
struct StoredApp {
    record: ApplicationRecord,
    version: Version,
    revisions: Vec<Revision>,
    channels: Vec<Channel>,
}

#[derive(Debug)]
struct State {
    apps: BTreeMap<AppId, StoredApp>,
    events: Vec<EventEnvelope>,
    next_event_id: i64,
    /// `None` once the last port has been handed out.
    next_port: Option<u16>,
}

pub struct InMemoryStore {
    state: Mutex<State>,
    before_commit: Mutex<Option<CommitHook>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_port_range_start(DEFAULT_PORT_RANGE_START)
    }

    pub fn with_port_range_start(start: u16) -> Self {
        Self {
            state: Mutex::new(State {
                apps: BTreeMap::new(),
                events: Vec::new(),
                next_event_id: 1,
                next_port: Some(start),
            }),
            before_commit: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every committed event in commit order.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.state().events.clone()
    }

    /// Runs `hook` once, right before the next commit is applied.
    ///
    /// Lets tests interleave a concurrent writer between load and commit.
    pub fn before_next_commit<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self
            .before_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Bumps the application version as an unrelated writer would.
    pub fn touch(&self, app_id: AppId) {
        if let Some(app) = self.state().apps.get_mut(&app_id) {
            app.version = app.version.next();
        }
    }

    pub fn remove_application(&self, app_id: AppId) {
        self.state().apps.remove(&app_id);
    }

    pub fn remove_channel(&self, app_id: AppId, channel_id: ChannelId) {
        if let Some(app) = self.state().apps.get_mut(&app_id) {
            app.channels.retain(|c| c.id != channel_id);
        }
    }

    /// Overwrites a stored channel without touching its version.
    pub fn overwrite_channel(&self, channel: Channel) {
        if let Some(app) = self.state().apps.get_mut(&channel.app_id) {
            if let Some(stored) = app.channels.iter_mut().find(|c| c.id == channel.id) {
                *stored = channel;
            }
        }
    }
}

fn check_commit(state: &State, commit: &Commit) -> Option<CommitResult> {
    let existing = state.apps.get(&commit.app_id);

    match (&commit.app, existing) {
        (AppWrite::Create(_), Some(_)) => return Some(CommitResult::Conflict),
        (AppWrite::Create(_), None) => {}
        (_, None) => return Some(CommitResult::NotFound),
        (
            AppWrite::Check { expected }
            | AppWrite::Update { expected, .. }
            | AppWrite::Delete { expected },
            Some(app),
        ) => {
            if app.version != *expected {
                return Some(CommitResult::Conflict);
            }
        }
    }

    let channels = existing.map(|app| app.channels.as_slice()).unwrap_or_default();
    for write in &commit.channels {
        let stored = channels.iter().find(|c| c.id == write.channel_id());
        let ok = match (write, stored) {
            (ChannelWrite::Insert(_), stored) => stored.is_none(),
            (ChannelWrite::Update { expected, .. }, Some(stored))
            | (ChannelWrite::Delete { expected, .. }, Some(stored))
            | (ChannelWrite::Check { expected, .. }, Some(stored)) => stored.version == *expected,
            (_, None) => false,
        };
        if !ok {
            return Some(CommitResult::Conflict);
        }
    }

    let revisions = existing.map(|app| app.revisions.clone()).unwrap_or_default();
    let Ok(mut ledger) = RevisionLedger::from_revisions(commit.app_id, revisions) else {
        return Some(CommitResult::Conflict);
    };
    let removed = commit
        .revisions_removed
        .iter()
        .all(|id| ledger.remove(*id).is_some());
    let added = commit
        .revisions_added
        .iter()
        .all(|revision| ledger.add(revision.clone()).is_ok());
    if !removed || !added {
        return Some(CommitResult::Conflict);
    }

    None
}

fn apply_channel_write(channels: &mut Vec<Channel>, write: ChannelWrite) {
    match write {
        ChannelWrite::Insert(channel) => channels.push(channel),
        ChannelWrite::Update { mut channel, expected } => {
            channel.version = expected.next();
            if let Some(stored) = channels.iter_mut().find(|c| c.id == channel.id) {
                *stored = channel;
            }
        }
        ChannelWrite::Delete { channel_id, .. } => channels.retain(|c| c.id != channel_id),
        ChannelWrite::Check { .. } => {}
    }
}

#[async_trait]
impl ApplicationStore for InMemoryStore {
    async fn load(&self, app_id: AppId) -> Result<Option<Application>, StoreError> {
        let Some(stored) = self.state().apps.get(&app_id).cloned() else {
            return Ok(None);
        };

        let ledger = RevisionLedger::from_revisions(app_id, stored.revisions).map_err(|e| {
            StoreError::Corrupt {
                what: format!("ledger of {app_id}"),
                reason: e.to_string(),
            }
        })?;

        Ok(Some(Application {
            id: stored.record.id,
            name: stored.record.name,
            storage: stored.record.storage,
            ledger,
            channels: stored.channels,
            collaborators: stored.record.collaborators,
            version: stored.version,
        }))
    }

    async fn list_applications(&self) -> Result<Vec<AppId>, StoreError> {
        Ok(self.state().apps.keys().copied().collect())
    }

    async fn next_port(&self) -> Result<Port, StoreError> {
        let mut state = self.state();
        let port = state
            .next_port
            .ok_or_else(|| StoreError::Backend("port range exhausted".to_string()))?;
        state.next_port = port.checked_add(1);
        Ok(Port(port))
    }

    async fn commit(&self, commit: Commit) -> Result<CommitResult, StoreError> {
        let hook = self
            .before_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }

        validate_causation(&commit.events)
            .map_err(|e| StoreError::Backend(format!("invalid event batch: {e}")))?;

        let mut state = self.state();
        if let Some(rejected) = check_commit(&state, &commit) {
            return Ok(rejected);
        }

        let Commit {
            app_id,
            app,
            revisions_added,
            revisions_removed,
            channels,
            events,
        } = commit;

        match app {
            AppWrite::Delete { .. } => {
                state.apps.remove(&app_id);
            }
            AppWrite::Create(record) => {
                state.apps.insert(
                    app_id,
                    StoredApp {
                        record,
                        version: Version::FIRST,
                        revisions: Vec::new(),
                        channels: Vec::new(),
                    },
                );
            }
            AppWrite::Update { record, expected } => {
                if let Some(stored) = state.apps.get_mut(&app_id) {
                    stored.record = record;
                    stored.version = expected.next();
                }
            }
            AppWrite::Check { .. } => {}
        }

        if let Some(stored) = state.apps.get_mut(&app_id) {
            stored.revisions.retain(|r| !revisions_removed.contains(&r.id));
            stored.revisions.extend(revisions_added);
            for write in channels {
                apply_channel_write(&mut stored.channels, write);
            }
        }

        let base = state.next_event_id;
        let count = events.len() as i64;
        let envelopes: Vec<EventEnvelope> = events
            .into_iter()
            .enumerate()
            .map(|(index, event)| {
                let causation = event.causation.map(|cause| EventId::new(base + cause as i64));
                event.into_envelope(EventId::new(base + index as i64), causation)
            })
            .collect();
        state.events.extend(envelopes);
        state.next_event_id = base + count;

        Ok(CommitResult::Success)
    }
}

/// Records every enqueued reference; can be told to fail or stall.
#[derive(Default)]
pub struct InMemoryQueue {
    delivered: Mutex<Vec<ChannelReference>>,
    failing: Mutex<HashSet<ChannelId>>,
    stalled: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<ChannelReference> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes every enqueue of `channel_id` fail until [`Self::recover`].
    pub fn fail_for(&self, channel_id: ChannelId) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel_id);
    }

    pub fn recover(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// While stalled, enqueues wait until cancelled.
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(
        &self,
        reference: ChannelReference,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        if self.stalled.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(QueueError::Cancelled);
        }

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&reference.channel_id);
        if failing {
            return Err(QueueError::Unavailable(format!(
                "no capacity for {reference}"
            )));
        }

        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reference);
        Ok(())
    }
}
