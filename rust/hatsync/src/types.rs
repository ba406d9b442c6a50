//! Location samples, sync blocks and sync outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Location Fix / Sample
// ============================================================================

/// A raw fix as delivered by the platform location manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in meters. Negative means invalid.
    pub horizontal_accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(
        latitude: f64,
        longitude: f64,
        horizontal_accuracy: f64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            horizontal_accuracy,
            captured_at,
        }
    }
}

/// Upload state of a stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    /// Only reachable when a retry policy sets `max_attempts`.
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// A fix that passed ingest and lives in the sample store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    /// Store-assigned, increasing with insertion order
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    pub captured_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    /// Number of failed upload attempts that included this sample
    pub attempts: u32,
    pub synced_at: Option<DateTime<Utc>>,
}

impl LocationSample {
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }
}

// ============================================================================
// Sync Block
// ============================================================================

/// Ordered, non-empty batch of pending samples for one upload attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBlock {
    samples: Vec<LocationSample>,
}

impl SyncBlock {
    /// Build a block from samples already in capture order.
    ///
    /// Returns `None` when the input is empty, contains a non-pending sample,
    /// or is not ordered by `(captured_at, id)`.
    pub fn new(samples: Vec<LocationSample>) -> Option<Self> {
        if samples.is_empty() || samples.iter().any(|s| !s.is_pending()) {
            return None;
        }
        let ordered = samples
            .windows(2)
            .all(|w| (w[0].captured_at, w[0].id) < (w[1].captured_at, w[1].id));
        if !ordered {
            return None;
        }
        Some(Self { samples })
    }

    /// Select the next block from a capture-ordered list of candidates.
    ///
    /// Skips anything that is not pending, then takes at most `block_size`.
    pub fn select(candidates: &[LocationSample], block_size: usize) -> Option<Self> {
        let picked: Vec<LocationSample> = candidates
            .iter()
            .filter(|s| s.is_pending())
            .take(block_size.max(1))
            .cloned()
            .collect();
        Self::new(picked)
    }

    pub fn samples(&self) -> &[LocationSample] {
        &self.samples
    }

    pub fn ids(&self) -> Vec<i64> {
        self.samples.iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_captured_at(&self) -> DateTime<Utc> {
        self.samples[0].captured_at
    }

    pub fn last_captured_at(&self) -> DateTime<Utc> {
        self.samples[self.samples.len() - 1].captured_at
    }
}

// ============================================================================
// Sync Outcome
// ============================================================================

/// Result of one upload attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub synced_count: u32,
    pub completed_at: DateTime<Utc>,
}

impl SyncOutcome {
    pub fn succeeded(synced_count: u32, completed_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            message: format!("Synced {} points", synced_count),
            synced_count,
            completed_at,
        }
    }

    pub fn failed(message: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            message: message.into(),
            synced_count: 0,
            completed_at,
        }
    }
}

/// UI-facing aggregates derived from the sample store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub total_count: u64,
    pub pending_count: u64,
    pub synced_count: u64,
    pub failed_count: u64,
    pub last_sample_at: Option<DateTime<Utc>>,
    /// Completion time of the most recent successful upload
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Records uploaded by the most recent successful upload
    pub last_sync_count: u32,
    /// Message of the most recent attempt, successful or not
    pub last_message: Option<String>,
    pub last_attempt_succeeded: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(id: i64, secs: i64, status: SyncStatus) -> LocationSample {
        LocationSample {
            id,
            latitude: 51.5,
            longitude: -0.12,
            horizontal_accuracy: 5.0,
            captured_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            sync_status: status,
            attempts: 0,
            synced_at: None,
        }
    }

    #[test]
    fn test_block_rejects_empty_and_non_pending() {
        assert!(SyncBlock::new(vec![]).is_none());
        assert!(SyncBlock::new(vec![sample(1, 0, SyncStatus::Synced)]).is_none());
    }

    #[test]
    fn test_block_requires_capture_order() {
        let out_of_order = vec![
            sample(2, 10, SyncStatus::Pending),
            sample(1, 5, SyncStatus::Pending),
        ];
        assert!(SyncBlock::new(out_of_order).is_none());

        // Same timestamp is ordered by id
        let same_second = vec![
            sample(1, 5, SyncStatus::Pending),
            sample(2, 5, SyncStatus::Pending),
        ];
        assert_eq!(SyncBlock::new(same_second).unwrap().len(), 2);
    }

    #[test]
    fn test_select_skips_synced_and_bounds_size() {
        let candidates = vec![
            sample(1, 0, SyncStatus::Synced),
            sample(2, 1, SyncStatus::Pending),
            sample(3, 2, SyncStatus::Pending),
            sample(4, 3, SyncStatus::Pending),
        ];
        let block = SyncBlock::select(&candidates, 2).unwrap();
        assert_eq!(block.ids(), vec![2, 3]);
        assert_eq!(block.first_captured_at(), candidates[1].captured_at);
        assert_eq!(block.last_captured_at(), candidates[2].captured_at);
    }

    #[test]
    fn test_sync_status_round_trip_through_str() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Failed] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncStatus::parse("unknown"), None);
    }
}
