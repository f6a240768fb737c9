//! # berth-id
//!
//! Stable ID types, parsing, and validation for the berth platform.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs are typed so a channel id can never be passed where a revision id is expected
//!
//! ## ID Format
//!
//! All resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `app_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `chan_01HV4Z4NYPLTRS0JTUA8XDME5F`
//! - `rev_01HV4Z2WQXKJNM8GPQY6VBKC3D`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
