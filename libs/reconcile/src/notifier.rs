//! Reschedule notifier: hands changed channels to the external work queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use berth_id::{AppId, ChannelId};
use futures_util::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::ChannelReference;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("enqueue cancelled")]
    Cancelled,
}

/// The external work queue a scheduler drains.
///
/// Delivery is at-least-once; consumers treat a repeated reference as a
/// no-op re-sync.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        reference: ChannelReference,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// At least one enqueue failed. Successful enqueues stay enqueued.
    #[error("failed to enqueue {} channel(s), {} enqueued", failures.len(), enqueued.len())]
    Failed {
        failures: Vec<(ChannelReference, QueueError)>,
        enqueued: Vec<ChannelReference>,
    },

    /// The batch was cancelled before every enqueue finished.
    #[error("reschedule cancelled with {} channel(s) pending", pending.len())]
    Cancelled {
        enqueued: Vec<ChannelReference>,
        pending: Vec<ChannelReference>,
    },
}

impl NotifyError {
    /// References that are known to be on the queue.
    pub fn enqueued(&self) -> &[ChannelReference] {
        match self {
            NotifyError::Failed { enqueued, .. } | NotifyError::Cancelled { enqueued, .. } => {
                enqueued
            }
        }
    }

    /// References the caller must retry.
    pub fn unsent(&self) -> Vec<ChannelReference> {
        match self {
            NotifyError::Failed { failures, .. } => failures.iter().map(|(r, _)| *r).collect(),
            NotifyError::Cancelled { pending, .. } => pending.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RescheduleNotifier {
    queue: Arc<dyn TaskQueue>,
    timeout: Option<Duration>,
}

impl RescheduleNotifier {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            queue,
            timeout: None,
        }
    }

    /// Cancels a batch that has not finished within `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enqueues one reference per distinct channel, all concurrently.
    ///
    /// Returns the references enqueued, in first-seen order.
    pub async fn notify_changed<I>(
        &self,
        app_id: AppId,
        channels: I,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelReference>, NotifyError>
    where
        I: IntoIterator<Item = ChannelId>,
    {
        let mut seen = HashSet::new();
        let references: Vec<ChannelReference> = channels
            .into_iter()
            .filter(|id| seen.insert(*id))
            .map(|id| ChannelReference::new(app_id, id))
            .collect();

        if references.is_empty() {
            return Ok(references);
        }

        let batch = cancel.child_token();
        let enqueues = references.iter().map(|reference| {
            let batch = &batch;
            let queue = &self.queue;
            async move {
                let result = tokio::select! {
                    biased;
                    _ = batch.cancelled() => Err(QueueError::Cancelled),
                    result = queue.enqueue(*reference, batch) => result,
                };
                (*reference, result)
            }
        });

        let all = join_all(enqueues);
        let results = match self.timeout {
            Some(timeout) => {
                tokio::pin!(all);
                tokio::select! {
                    results = &mut all => results,
                    _ = tokio::time::sleep(timeout) => {
                        warn!(app_id = %app_id, timeout_ms = timeout.as_millis() as u64, "Reschedule batch timed out");
                        batch.cancel();
                        all.await
                    }
                }
            }
            None => all.await,
        };

        let mut enqueued = Vec::new();
        let mut pending = Vec::new();
        let mut failures = Vec::new();
        for (reference, result) in results {
            match result {
                Ok(()) => {
                    debug!(channel = %reference, "Reschedule enqueued");
                    enqueued.push(reference);
                }
                Err(QueueError::Cancelled) => pending.push(reference),
                Err(error) => {
                    warn!(channel = %reference, error = %error, "Reschedule enqueue failed");
                    failures.push((reference, error));
                }
            }
        }

        if !pending.is_empty() && batch.is_cancelled() {
            pending.extend(failures.into_iter().map(|(reference, _)| reference));
            return Err(NotifyError::Cancelled { enqueued, pending });
        }
        if !failures.is_empty() || !pending.is_empty() {
            failures.extend(pending.into_iter().map(|r| (r, QueueError::Cancelled)));
            return Err(NotifyError::Failed { failures, enqueued });
        }
        Ok(enqueued)
    }
}
