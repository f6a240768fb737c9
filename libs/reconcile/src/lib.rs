//! Channel revision resolution and rescheduling.
//!
//! An application owns an ordered ledger of revisions and a set of channels.
//! Each channel picks the revision it serves through a [`Selection`]: a
//! pinned revision or a range rule evaluated against the ledger. This crate
//! keeps every channel's cached active revision equal to what its selection
//! computes, records each transition as an audit event and hands changed
//! channels to an external scheduler queue.
//!
//! Layers, leaf first:
//!
//! - [`ledger`], [`version`], [`rule`]: revision ordering and range rules
//! - [`selector`]: pure resolution of one channel
//! - [`engine`]: in-place reevaluation and change detection
//! - [`recorder`], [`notifier`]: audit events and reschedule hand-off
//! - [`service`]: edit operations tying the above to a [`store`]
//!
//! # Invariants
//!
//! - Resolution is deterministic and idempotent
//! - A committed active-revision change is always followed by an enqueue
//!   attempt, and a failed enqueue is surfaced to the caller
//! - Events of one edit are committed with the state they describe

pub mod context;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod model;
pub mod notifier;
pub mod recorder;
pub mod rule;
pub mod selector;
pub mod service;
pub mod store;
pub mod version;
pub mod workload;

pub use context::OpContext;
pub use engine::{reevaluate, reevaluate_all, ChannelFailure, ReevaluateErrors, ReevaluateOutcome};
pub use error::{EditError, ValidationError};
pub use ledger::{LedgerError, RevisionLedger};
pub use model::{
    ActiveRevisionChange, Application, ApplicationRecord, Channel, ChannelReference, Domain,
    Port, Revision, Selection,
};
pub use notifier::{NotifyError, QueueError, RescheduleNotifier, TaskQueue};
pub use recorder::EventRecorder;
pub use rule::{RangeRule, RuleError};
pub use selector::{resolve, ResolveError};
pub use service::{ChannelDraft, EditOutcome, EditService};
pub use store::{AppWrite, ApplicationStore, ChannelWrite, Commit, CommitResult, StoreError};
pub use version::{OrderKey, RevisionNumber, VersionError};
pub use workload::SpecHash;
