//! Revision selector: computes the revision a channel should serve.

use berth_id::{AppId, ChannelId};
use thiserror::Error;

use crate::ledger::RevisionLedger;
use crate::model::{Channel, Revision, Selection};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The channel was resolved against another application's ledger.
    #[error("channel {channel_id} of {channel_app} cannot resolve against ledger of {ledger_app}")]
    ForeignChannel {
        channel_id: ChannelId,
        channel_app: AppId,
        ledger_app: AppId,
    },
}

/// Computes the revision `channel` should currently serve.
///
/// Pure: the same channel and ledger always give the same answer.
/// `Ok(None)` means no revision qualifies, which is not an error.
pub fn resolve<'a>(
    channel: &Channel,
    ledger: &'a RevisionLedger,
) -> Result<Option<&'a Revision>, ResolveError> {
    if channel.app_id != ledger.app_id() {
        return Err(ResolveError::ForeignChannel {
            channel_id: channel.id,
            channel_app: channel.app_id,
            ledger_app: ledger.app_id(),
        });
    }

    Ok(match &channel.selection {
        Selection::Specified(id) => ledger.get(*id),
        Selection::RangeRule(rule) => ledger
            .iter_descending()
            .find(|revision| rule.matches(RevisionLedger::order_key(revision))),
    })
}
