//! Reconciliation engine: recompute cached active revisions and report
//! what changed.

use berth_id::ChannelId;
use thiserror::Error;

use crate::ledger::RevisionLedger;
use crate::model::{ActiveRevisionChange, Application, Channel};
use crate::selector::{resolve, ResolveError};

/// Re-resolves one channel and updates its cached active revision in place.
///
/// Returns the transition when the cache changed; `None` when it already
/// held the right answer. `Some -> None` and `None -> Some` are both
/// transitions.
pub fn reevaluate(
    channel: &mut Channel,
    ledger: &RevisionLedger,
) -> Result<Option<ActiveRevisionChange>, ResolveError> {
    let resolved = resolve(channel, ledger)?.map(|revision| revision.id);

    if resolved == channel.active_revision {
        return Ok(None);
    }

    let changed_from = std::mem::replace(&mut channel.active_revision, resolved);
    Ok(Some(ActiveRevisionChange {
        app_id: channel.app_id,
        channel_id: channel.id,
        changed_from,
        changed_to: resolved,
    }))
}

/// A channel that could not be re-resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub channel_id: ChannelId,
    pub error: ResolveError,
}

/// Every failure of one `reevaluate_all` pass, plus the changes that did apply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{} channel(s) failed to reevaluate", failures.len())]
pub struct ReevaluateErrors {
    pub changes: Vec<ActiveRevisionChange>,
    pub failures: Vec<ChannelFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReevaluateOutcome {
    pub changes: Vec<ActiveRevisionChange>,
    pub failures: Vec<ChannelFailure>,
}

impl ReevaluateOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<ActiveRevisionChange>, ReevaluateErrors> {
        if self.failures.is_empty() {
            Ok(self.changes)
        } else {
            Err(ReevaluateErrors {
                changes: self.changes,
                failures: self.failures,
            })
        }
    }
}

/// Re-resolves every channel of `app` in insertion order.
///
/// Channels are independent: a failure is collected and the pass moves on.
pub fn reevaluate_all(app: &mut Application) -> ReevaluateOutcome {
    let mut outcome = ReevaluateOutcome::default();
    let ledger = &app.ledger;

    for channel in app.channels.iter_mut() {
        match reevaluate(channel, ledger) {
            Ok(Some(change)) => outcome.changes.push(change),
            Ok(None) => {}
            Err(error) => outcome.failures.push(ChannelFailure {
                channel_id: channel.id,
                error,
            }),
        }
    }

    outcome
}
