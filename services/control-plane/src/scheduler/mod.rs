//! Background repair of cached active revisions.
//!
//! Edits keep every channel's active revision current, but a missed enqueue
//! or an interrupted edit can leave drift behind. The repair worker
//! periodically re-resolves every application and reschedules whatever moved.

mod failures;
mod worker;

pub use failures::{FailureStreak, FailureWindow};
pub use worker::{RepairStats, RepairWorker};
