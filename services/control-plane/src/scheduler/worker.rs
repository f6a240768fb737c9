//! Repair background worker.
//!
//! Runs a repair pass over every application on a periodic interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use berth_id::RequestId;
use berth_reconcile::{EditError, EditService, OpContext};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::failures::FailureWindow;

/// Counts from one repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub apps_processed: usize,
    pub channels_repaired: usize,
    pub apps_failed: usize,
    pub apps_skipped: usize,
}

pub struct RepairWorker {
    service: Arc<EditService>,
    interval: Duration,
}

impl RepairWorker {
    pub fn new(service: Arc<EditService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run the repair worker until shutdown is signaled.
    #[instrument(skip(self, shutdown), name = "repair_worker")]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting repair worker"
        );

        let mut failures = FailureWindow::default();
        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; wait a full interval instead.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_pass(&mut failures).await {
                        Ok(stats) if stats.channels_repaired > 0 || stats.apps_failed > 0 => {
                            info!(
                                apps_processed = stats.apps_processed,
                                channels_repaired = stats.channels_repaired,
                                apps_failed = stats.apps_failed,
                                apps_skipped = stats.apps_skipped,
                                "Repair pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Repair pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Repair worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single repair pass over every application.
    ///
    /// Applications that keep failing are skipped until their failure
    /// window closes.
    pub async fn run_pass(&self, failures: &mut FailureWindow) -> Result<RepairStats, EditError> {
        let app_ids = self.service.store().list_applications().await?;
        let pass_id = RequestId::new();
        let mut stats = RepairStats::default();

        for app_id in app_ids {
            if let Some(streak) = failures.skipped(app_id, Instant::now()) {
                debug!(
                    app_id = %app_id,
                    failures = streak.failures,
                    last_kind = streak.last_kind,
                    "Skipping application with repeated repair failures"
                );
                stats.apps_skipped += 1;
                continue;
            }

            let ctx = OpContext::system().with_correlation_id(format!("repair:{pass_id}"));
            stats.apps_processed += 1;

            match self.service.reconcile_application(&ctx, app_id).await {
                Ok(outcome) => {
                    failures.clear(app_id);
                    stats.channels_repaired += outcome.changes.len();
                }
                // Deleted since the listing.
                Err(EditError::NotFound { .. }) => failures.clear(app_id),
                Err(e) => {
                    stats.apps_failed += 1;
                    let exhausted = failures.record_failure(app_id, e.as_label(), Instant::now());
                    warn!(
                        app_id = %app_id,
                        error = %e,
                        kind = e.as_label(),
                        exhausted,
                        "Repair failed"
                    );
                }
            }
        }

        failures.prune(Instant::now());
        Ok(stats)
    }
}
