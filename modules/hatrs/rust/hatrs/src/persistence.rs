//! SQLite-backed sample store.
//!
//! Append-only buffer of location samples plus the sync history. Only sync
//! status, attempt count and sync time of a sample ever change; rows are
//! removed only by [`SampleStore::clear`].

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use hatsync::{
    HatError, LocationFix, LocationSample, SyncBlock, SyncOutcome, SyncStatus, TimeRange,
};
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, Result as SqlResult, Row, params};

use crate::migrations;

/// Sync outcomes kept besides the latest attempt and latest success
const MAX_OUTCOME_HISTORY: usize = 100;

const SAMPLE_COLUMNS: &str =
    "id, latitude, longitude, accuracy, captured_at, sync_status, attempts, synced_at";

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn sample_from_row(row: &Row<'_>) -> SqlResult<LocationSample> {
    let status: String = row.get(5)?;
    let synced_at: Option<i64> = row.get(7)?;
    Ok(LocationSample {
        id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        horizontal_accuracy: row.get(3)?,
        captured_at: from_millis(row.get(4)?),
        sync_status: SyncStatus::parse(&status).unwrap_or(SyncStatus::Pending),
        attempts: row.get(6)?,
        synced_at: synced_at.map(from_millis),
    })
}

fn outcome_from_row(row: &Row<'_>) -> SqlResult<SyncOutcome> {
    Ok(SyncOutcome {
        success: row.get(0)?,
        message: row.get(1)?,
        synced_count: row.get(2)?,
        completed_at: from_millis(row.get(3)?),
    })
}

/// Store shared by ingest, walker and reporter.
pub type SharedStore = Arc<Mutex<SampleStore>>;

/// Lock a shared store, mapping poisoning to a storage error.
pub fn lock_store(store: &SharedStore) -> hatsync::Result<MutexGuard<'_, SampleStore>> {
    store
        .lock()
        .map_err(|_| HatError::storage("sample store lock poisoned"))
}

/// Durable, ordered collection of location samples.
pub struct SampleStore {
    db: Connection,
    db_path: String,
}

impl SampleStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the store at `db_path` and run pending migrations.
    pub fn open(db_path: &str) -> hatsync::Result<Self> {
        let mut db = Connection::open(db_path).map_err(HatError::storage)?;
        db.pragma_update(None, "foreign_keys", "ON")
            .map_err(HatError::storage)?;
        migrations::migrate(&mut db).map_err(HatError::storage)?;

        info!("[SampleStore] Opened {}", db_path);
        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> hatsync::Result<Self> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Applied migration count.
    pub fn schema_version(&self) -> i64 {
        migrations::schema_version(&self.db)
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    // ========================================================================
    // Samples
    // ========================================================================

    /// Append an accepted fix as a Pending sample.
    pub fn insert(&mut self, fix: &LocationFix) -> SqlResult<LocationSample> {
        self.db.execute(
            "INSERT INTO samples (latitude, longitude, accuracy, captured_at, sync_status)
             VALUES (?, ?, ?, ?, ?)",
            params![
                fix.latitude,
                fix.longitude,
                fix.horizontal_accuracy,
                to_millis(fix.captured_at),
                SyncStatus::Pending.as_str(),
            ],
        )?;
        let id = self.db.last_insert_rowid();
        debug!("[SampleStore] Inserted sample {}", id);

        Ok(LocationSample {
            id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            horizontal_accuracy: fix.horizontal_accuracy,
            captured_at: from_millis(to_millis(fix.captured_at)),
            sync_status: SyncStatus::Pending,
            attempts: 0,
            synced_at: None,
        })
    }

    pub fn count(&self) -> SqlResult<u64> {
        let n: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn count_by_status(&self, status: SyncStatus) -> SqlResult<u64> {
        let n: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM samples WHERE sync_status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Most recently captured sample, if any.
    pub fn last_sample(&self) -> SqlResult<Option<LocationSample>> {
        self.db
            .query_row(
                &format!(
                    "SELECT {} FROM samples ORDER BY captured_at DESC, id DESC LIMIT 1",
                    SAMPLE_COLUMNS
                ),
                [],
                sample_from_row,
            )
            .optional()
    }

    pub fn get(&self, id: i64) -> SqlResult<Option<LocationSample>> {
        self.db
            .query_row(
                &format!("SELECT {} FROM samples WHERE id = ?", SAMPLE_COLUMNS),
                params![id],
                sample_from_row,
            )
            .optional()
    }

    /// Samples captured within `range`, oldest first.
    pub fn samples_between(&self, range: &TimeRange) -> SqlResult<Vec<LocationSample>> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {} FROM samples
             WHERE captured_at >= ? AND captured_at <= ?
             ORDER BY captured_at, id",
            SAMPLE_COLUMNS
        ))?;
        let samples = stmt
            .query_map(
                params![to_millis(range.from), to_millis(range.to)],
                sample_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(samples)
    }

    // ========================================================================
    // Sync Block Lifecycle
    // ========================================================================

    /// Oldest Pending samples in capture order, at most `block_size`.
    pub fn next_pending_block(&self, block_size: usize) -> SqlResult<Option<SyncBlock>> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {} FROM samples
             WHERE sync_status = ?
             ORDER BY captured_at, id
             LIMIT ?",
            SAMPLE_COLUMNS
        ))?;
        let candidates = stmt
            .query_map(
                params![SyncStatus::Pending.as_str(), block_size.max(1) as i64],
                sample_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(SyncBlock::select(&candidates, block_size))
    }

    /// Mark a block Synced. Only rows still Pending change.
    ///
    /// Returns the number of rows transitioned.
    pub fn mark_synced(&mut self, ids: &[i64], synced_at: DateTime<Utc>) -> SqlResult<usize> {
        let tx = self.db.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE samples SET sync_status = ?, synced_at = ?, last_error = NULL
                 WHERE id = ? AND sync_status = ?",
            )?;
            for id in ids {
                changed += stmt.execute(params![
                    SyncStatus::Synced.as_str(),
                    to_millis(synced_at),
                    id,
                    SyncStatus::Pending.as_str(),
                ])?;
            }
        }
        tx.commit()?;

        if changed != ids.len() {
            warn!(
                "[SampleStore] mark_synced: {} of {} samples were no longer pending",
                ids.len() - changed,
                ids.len()
            );
        }
        Ok(changed)
    }

    /// Record a failed upload attempt for a block.
    ///
    /// Attempts are incremented on rows still Pending. With `max_attempts`
    /// set, rows reaching it become Failed. Returns how many were marked
    /// Failed.
    pub fn record_failure(
        &mut self,
        ids: &[i64],
        error: &str,
        max_attempts: Option<u32>,
    ) -> SqlResult<usize> {
        let tx = self.db.transaction()?;
        let mut failed = 0;
        {
            let mut bump = tx.prepare(
                "UPDATE samples SET attempts = attempts + 1, last_error = ?
                 WHERE id = ? AND sync_status = ?",
            )?;
            for id in ids {
                bump.execute(params![error, id, SyncStatus::Pending.as_str()])?;
            }

            if let Some(max) = max_attempts {
                let mut give_up = tx.prepare(
                    "UPDATE samples SET sync_status = ?
                     WHERE id = ? AND sync_status = ? AND attempts >= ?",
                )?;
                for id in ids {
                    failed += give_up.execute(params![
                        SyncStatus::Failed.as_str(),
                        id,
                        SyncStatus::Pending.as_str(),
                        max,
                    ])?;
                }
            }
        }
        tx.commit()?;

        if failed > 0 {
            warn!("[SampleStore] {} samples exceeded max attempts", failed);
        }
        Ok(failed)
    }

    /// Move Failed samples back to Pending with a fresh attempt counter.
    pub fn requeue_failed(&mut self) -> SqlResult<usize> {
        let n = self.db.execute(
            "UPDATE samples SET sync_status = ?, attempts = 0 WHERE sync_status = ?",
            params![SyncStatus::Pending.as_str(), SyncStatus::Failed.as_str()],
        )?;
        info!("[SampleStore] Requeued {} failed samples", n);
        Ok(n)
    }

    /// Last upload error stored against a sample.
    pub fn last_error(&self, id: i64) -> SqlResult<Option<String>> {
        self.db
            .query_row(
                "SELECT last_error FROM samples WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map(Option::flatten)
    }

    // ========================================================================
    // Sync History
    // ========================================================================

    pub fn record_outcome(&mut self, outcome: &SyncOutcome) -> SqlResult<()> {
        self.db.execute(
            "INSERT INTO sync_outcomes (success, message, synced_count, completed_at)
             VALUES (?, ?, ?, ?)",
            params![
                outcome.success,
                outcome.message,
                outcome.synced_count,
                to_millis(outcome.completed_at),
            ],
        )?;

        // The reporter only reads the latest attempt and the latest success
        let pruned = self.db.execute(
            "DELETE FROM sync_outcomes
             WHERE id NOT IN (SELECT id FROM sync_outcomes ORDER BY id DESC LIMIT ?1)
               AND id NOT IN (SELECT id FROM sync_outcomes
                              ORDER BY completed_at DESC, id DESC LIMIT 1)
               AND id NOT IN (SELECT id FROM sync_outcomes WHERE success = 1
                              ORDER BY completed_at DESC, id DESC LIMIT 1)",
            params![MAX_OUTCOME_HISTORY as i64],
        )?;
        if pruned > 0 {
            debug!("[SampleStore] Pruned {} old sync outcomes", pruned);
        }
        Ok(())
    }

    pub fn outcome_count(&self) -> SqlResult<u64> {
        let n: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM sync_outcomes", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Most recent attempt, successful or not.
    pub fn last_outcome(&self) -> SqlResult<Option<SyncOutcome>> {
        self.db
            .query_row(
                "SELECT success, message, synced_count, completed_at FROM sync_outcomes
                 ORDER BY completed_at DESC, id DESC LIMIT 1",
                [],
                outcome_from_row,
            )
            .optional()
    }

    pub fn last_successful_outcome(&self) -> SqlResult<Option<SyncOutcome>> {
        self.db
            .query_row(
                "SELECT success, message, synced_count, completed_at FROM sync_outcomes
                 WHERE success = 1
                 ORDER BY completed_at DESC, id DESC LIMIT 1",
                [],
                outcome_from_row,
            )
            .optional()
    }

    /// Delete all samples and history.
    pub fn clear(&mut self) -> SqlResult<()> {
        self.db.execute_batch(
            "DELETE FROM samples;
             DELETE FROM sync_outcomes;",
        )?;
        info!("[SampleStore] Cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fix(secs: i64) -> LocationFix {
        LocationFix::new(51.5, -0.12, 5.0, t(secs))
    }

    fn store_with(n: i64) -> SampleStore {
        let mut store = SampleStore::in_memory().unwrap();
        for i in 0..n {
            store.insert(&fix(i)).unwrap();
        }
        store
    }

    #[test]
    fn test_insert_is_pending() {
        let mut store = SampleStore::in_memory().unwrap();
        let sample = store.insert(&fix(0)).unwrap();
        assert_eq!(sample.sync_status, SyncStatus::Pending);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.count_by_status(SyncStatus::Pending).unwrap(), 1);
        assert_eq!(store.get(sample.id).unwrap(), Some(sample));
    }

    #[test]
    fn test_ids_increase() {
        let mut store = SampleStore::in_memory().unwrap();
        let a = store.insert(&fix(0)).unwrap();
        let b = store.insert(&fix(0)).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_next_block_in_capture_order() {
        let mut store = SampleStore::in_memory().unwrap();
        // Inserted out of capture order
        let late = store.insert(&fix(10)).unwrap();
        let early = store.insert(&fix(5)).unwrap();

        let block = store.next_pending_block(10).unwrap().unwrap();
        assert_eq!(block.ids(), vec![early.id, late.id]);
    }

    #[test]
    fn test_synced_samples_are_never_reselected() {
        let mut store = store_with(5);
        let first = store.next_pending_block(3).unwrap().unwrap();
        assert_eq!(store.mark_synced(&first.ids(), t(100)).unwrap(), 3);

        let second = store.next_pending_block(3).unwrap().unwrap();
        assert_eq!(second.len(), 2);
        assert!(second.ids().iter().all(|id| !first.ids().contains(id)));

        store.mark_synced(&second.ids(), t(101)).unwrap();
        assert!(store.next_pending_block(3).unwrap().is_none());
        assert_eq!(store.count_by_status(SyncStatus::Synced).unwrap(), 5);
    }

    #[test]
    fn test_mark_synced_skips_non_pending() {
        let mut store = store_with(2);
        let block = store.next_pending_block(2).unwrap().unwrap();
        store.mark_synced(&block.ids(), t(100)).unwrap();
        assert_eq!(store.mark_synced(&block.ids(), t(200)).unwrap(), 0);

        let sample = store.get(block.ids()[0]).unwrap().unwrap();
        assert_eq!(sample.synced_at, Some(t(100)));
    }

    #[test]
    fn test_failure_keeps_pending_by_default() {
        let mut store = store_with(3);
        let block = store.next_pending_block(10).unwrap().unwrap();
        for _ in 0..5 {
            assert_eq!(
                store.record_failure(&block.ids(), "network timeout", None).unwrap(),
                0
            );
        }
        assert_eq!(store.count_by_status(SyncStatus::Pending).unwrap(), 3);
        let sample = store.get(block.ids()[0]).unwrap().unwrap();
        assert_eq!(sample.attempts, 5);
        assert_eq!(
            store.last_error(sample.id).unwrap().as_deref(),
            Some("network timeout")
        );
    }

    #[test]
    fn test_max_attempts_marks_failed_and_requeue_restores() {
        let mut store = store_with(2);
        let block = store.next_pending_block(10).unwrap().unwrap();

        assert_eq!(store.record_failure(&block.ids(), "500", Some(2)).unwrap(), 0);
        assert_eq!(store.record_failure(&block.ids(), "500", Some(2)).unwrap(), 2);
        assert_eq!(store.count_by_status(SyncStatus::Failed).unwrap(), 2);
        assert!(store.next_pending_block(10).unwrap().is_none());

        assert_eq!(store.requeue_failed().unwrap(), 2);
        let block = store.next_pending_block(10).unwrap().unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block.samples()[0].attempts, 0);
    }

    #[test]
    fn test_outcomes() {
        let mut store = SampleStore::in_memory().unwrap();
        assert!(store.last_outcome().unwrap().is_none());

        store.record_outcome(&SyncOutcome::succeeded(3, t(10))).unwrap();
        store
            .record_outcome(&SyncOutcome::failed("network timeout", t(20)))
            .unwrap();

        let last = store.last_outcome().unwrap().unwrap();
        assert!(!last.success);
        assert_eq!(last.message, "network timeout");

        let ok = store.last_successful_outcome().unwrap().unwrap();
        assert_eq!(ok.synced_count, 3);
        assert_eq!(ok.completed_at, t(10));
    }

    #[test]
    fn test_outcome_history_is_bounded() {
        let mut store = SampleStore::in_memory().unwrap();
        store.record_outcome(&SyncOutcome::succeeded(7, t(0))).unwrap();
        for i in 1..=(MAX_OUTCOME_HISTORY as i64 * 3) {
            store
                .record_outcome(&SyncOutcome::failed("HTTP 503", t(i)))
                .unwrap();
        }

        assert_eq!(store.outcome_count().unwrap(), MAX_OUTCOME_HISTORY as u64 + 1);
        let ok = store.last_successful_outcome().unwrap().unwrap();
        assert_eq!(ok.synced_count, 7);
        assert_eq!(ok.completed_at, t(0));
        let last = store.last_outcome().unwrap().unwrap();
        assert_eq!(last.completed_at, t(MAX_OUTCOME_HISTORY as i64 * 3));
    }

    #[test]
    fn test_samples_between_and_last_sample() {
        let store = store_with(10);
        let range = TimeRange {
            from: t(2),
            to: t(4),
        };
        let samples = store.samples_between(&range).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(store.last_sample().unwrap().unwrap().captured_at, t(9));
    }

    #[test]
    fn test_millisecond_precision_survives() {
        let mut store = SampleStore::in_memory().unwrap();
        let at = t(0) + Duration::milliseconds(123);
        store.insert(&LocationFix::new(1.0, 2.0, 3.0, at)).unwrap();
        assert_eq!(store.last_sample().unwrap().unwrap().captured_at, at);
    }

    #[test]
    fn test_clear() {
        let mut store = store_with(3);
        store.record_outcome(&SyncOutcome::succeeded(3, t(0))).unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.last_outcome().unwrap().is_none());
    }
}
