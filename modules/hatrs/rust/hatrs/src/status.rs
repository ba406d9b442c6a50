//! Read-only aggregates for the UI.

use hatsync::{HatError, StatusReport, SyncStatus};
use log::{debug, warn};

use crate::persistence::{SharedStore, lock_store};
use crate::session::SyncListener;

/// Derives counts and last-sync information from the sample store.
pub struct StatusReporter {
    store: SharedStore,
}

impl StatusReporter {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn report(&self) -> hatsync::Result<StatusReport> {
        let store = lock_store(&self.store)?;
        let build = || -> rusqlite::Result<StatusReport> {
            let last_sync = store.last_successful_outcome()?;
            let last_attempt = store.last_outcome()?;

            Ok(StatusReport {
                total_count: store.count()?,
                pending_count: store.count_by_status(SyncStatus::Pending)?,
                synced_count: store.count_by_status(SyncStatus::Synced)?,
                failed_count: store.count_by_status(SyncStatus::Failed)?,
                last_sample_at: store.last_sample()?.map(|s| s.captured_at),
                last_sync_at: last_sync.as_ref().map(|o| o.completed_at),
                last_sync_count: last_sync.as_ref().map_or(0, |o| o.synced_count),
                last_message: last_attempt.as_ref().map(|o| o.message.clone()),
                last_attempt_succeeded: last_attempt.as_ref().map(|o| o.success),
            })
        };
        build().map_err(HatError::storage)
    }

    /// Push the current report to the listener. Errors are logged.
    pub fn publish(&self, listener: &dyn SyncListener) {
        match self.report() {
            Ok(report) => {
                debug!(
                    "[StatusReporter] total={} synced={} pending={}",
                    report.total_count, report.synced_count, report.pending_count
                );
                listener.on_status(&report);
            }
            Err(e) => warn!("[StatusReporter] Failed to build report: {}", e),
        }
    }
}
