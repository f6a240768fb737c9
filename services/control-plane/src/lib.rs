//! berth control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod config;
pub mod db;
pub mod scheduler;

use std::sync::Arc;

use berth_reconcile::{EditService, RescheduleNotifier};

use crate::config::Config;
use crate::db::Database;

/// Wires the Postgres store and queue into an edit service.
pub fn edit_service(db: &Database, config: &Config) -> EditService {
    let store = Arc::new(db.application_store(config.port_range_start));
    let queue = Arc::new(db.task_queue());
    let notifier = RescheduleNotifier::new(queue).with_timeout(config.notify_timeout);
    EditService::new(store, notifier)
}
