//! Revision ledger: the ordered set of revisions of one application.

use berth_id::{AppId, RevisionId};
use thiserror::Error;

use crate::model::Revision;
use crate::version::{OrderKey, RevisionNumber};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A revision with an equal number (by order key) is already registered.
    #[error("revision {number} already exists")]
    DuplicateRevision { number: String },

    /// The revision belongs to a different application.
    #[error("revision {revision_id} belongs to {owner}, not {app_id}")]
    ForeignRevision {
        revision_id: RevisionId,
        owner: AppId,
        app_id: AppId,
    },
}

/// Revisions of a single application, kept sorted by ascending order key.
///
/// Order keys are unique within a ledger, so iteration order is total and
/// needs no tie-break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionLedger {
    app_id: AppId,
    revisions: Vec<Revision>,
}

impl RevisionLedger {
    pub fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            revisions: Vec::new(),
        }
    }

    /// Rebuilds a ledger from stored revisions in any order.
    pub fn from_revisions<I>(app_id: AppId, revisions: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = Revision>,
    {
        let mut ledger = Self::new(app_id);
        for revision in revisions {
            ledger.add(revision)?;
        }
        Ok(ledger)
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// Adds a revision. On error the ledger is unchanged.
    pub fn add(&mut self, revision: Revision) -> Result<(), LedgerError> {
        if revision.app_id != self.app_id {
            return Err(LedgerError::ForeignRevision {
                revision_id: revision.id,
                owner: revision.app_id,
                app_id: self.app_id,
            });
        }

        match self
            .revisions
            .binary_search_by(|r| Self::order_key(r).cmp(Self::order_key(&revision)))
        {
            Ok(_) => Err(LedgerError::DuplicateRevision {
                number: revision.number.to_string(),
            }),
            Err(index) => {
                self.revisions.insert(index, revision);
                Ok(())
            }
        }
    }

    /// Removes a revision by id, returning it if it was present.
    pub fn remove(&mut self, id: RevisionId) -> Option<Revision> {
        let index = self.revisions.iter().position(|r| r.id == id)?;
        Some(self.revisions.remove(index))
    }

    /// The key revisions are ordered by; highest is most recent.
    pub fn order_key(revision: &Revision) -> &OrderKey {
        revision.number.order_key()
    }

    pub fn get(&self, id: RevisionId) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: RevisionId) -> bool {
        self.get(id).is_some()
    }

    pub fn by_number(&self, number: &RevisionNumber) -> Option<&Revision> {
        self.revisions
            .binary_search_by(|r| Self::order_key(r).cmp(number.order_key()))
            .ok()
            .map(|index| &self.revisions[index])
    }

    pub fn latest(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Iterates from the most recent revision to the oldest.
    pub fn iter_descending(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.iter().rev()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.iter()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}
