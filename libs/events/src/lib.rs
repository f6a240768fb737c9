//! # berth-events
//!
//! Audit event definitions for the berth platform.
//!
//! ## Design Principles
//!
//! - Events are immutable, append-only records of committed edits
//! - Every event belongs to exactly one aggregate (application, revision or channel)
//! - Events produced by one edit are appended in causal order; an event
//!   caused by an earlier event of the same edit points back at it
//!
//! ## Event Types
//!
//! - Application events (`app.*`)
//! - Revision events (`revision.*`)
//! - Channel events (`channel.*`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
