//! FFI-safe types with UniFFI derives.
//!
//! These types mirror hatsync types but add UniFFI derives for mobile FFI.
//! Timestamps cross the boundary as Unix milliseconds. Conversion is done at
//! the FFI boundary.

use chrono::{DateTime, Utc};
use hatsync::{
    FeedFilter, FeedItem, FeedSource, HatError, LocationFix, LocationPreferences, LocationSample,
    StatusReport, SyncStatus, TimePeriod,
};

use crate::walker::{SkipReason, TickResult};

fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error, uniffi::Error)]
pub enum FfiHatError {
    #[error("Invalid location fix: {message}")]
    InvalidFix { message: String },
    #[error("Authentication expired")]
    AuthExpired,
    #[error("Upload failed: {message}")]
    UploadFailed {
        message: String,
        status_code: Option<u16>,
    },
    #[error("Storage error: {message}")]
    Storage { message: String },
    #[error("Configuration error: {message}")]
    Config { message: String },
    #[error("Feed error: {message}")]
    Feed { message: String },
}

impl From<HatError> for FfiHatError {
    fn from(e: HatError) -> Self {
        match e {
            HatError::InvalidFix { reason } => Self::InvalidFix {
                message: reason.to_string(),
            },
            HatError::AuthExpired => Self::AuthExpired,
            HatError::UploadFailed {
                message,
                status_code,
            } => Self::UploadFailed {
                message,
                status_code,
            },
            HatError::Storage { message } => Self::Storage { message },
            HatError::Config { message } => Self::Config { message },
            HatError::Feed { message } => Self::Feed { message },
        }
    }
}

// ============================================================================
// Location
// ============================================================================

/// Location fix for FFI
#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct FfiLocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters; negative means invalid
    pub horizontal_accuracy: f64,
    pub captured_at_ms: i64,
}

impl From<FfiLocationFix> for LocationFix {
    fn from(f: FfiLocationFix) -> Self {
        LocationFix::new(
            f.latitude,
            f.longitude,
            f.horizontal_accuracy,
            from_ms(f.captured_at_ms),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiSyncStatus {
    Pending,
    Synced,
    Failed,
}

impl From<SyncStatus> for FfiSyncStatus {
    fn from(s: SyncStatus) -> Self {
        match s {
            SyncStatus::Pending => Self::Pending,
            SyncStatus::Synced => Self::Synced,
            SyncStatus::Failed => Self::Failed,
        }
    }
}

/// Stored sample for FFI (map display)
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiLocationSample {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    pub captured_at_ms: i64,
    pub sync_status: FfiSyncStatus,
    pub attempts: u32,
    pub synced_at_ms: Option<i64>,
}

impl From<LocationSample> for FfiLocationSample {
    fn from(s: LocationSample) -> Self {
        Self {
            id: s.id,
            latitude: s.latitude,
            longitude: s.longitude,
            horizontal_accuracy: s.horizontal_accuracy,
            captured_at_ms: to_ms(s.captured_at),
            sync_status: s.sync_status.into(),
            attempts: s.attempts,
            synced_at_ms: s.synced_at.map(to_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct FfiLocationPreferences {
    pub desired_accuracy: f64,
    pub distance_filter: Option<f64>,
}

impl From<FfiLocationPreferences> for LocationPreferences {
    fn from(p: FfiLocationPreferences) -> Self {
        Self {
            desired_accuracy: p.desired_accuracy,
            distance_filter: p.distance_filter,
        }
    }
}

impl From<LocationPreferences> for FfiLocationPreferences {
    fn from(p: LocationPreferences) -> Self {
        Self {
            desired_accuracy: p.desired_accuracy,
            distance_filter: p.distance_filter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiTimePeriod {
    Today,
    Yesterday,
    LastWeek,
}

impl From<FfiTimePeriod> for TimePeriod {
    fn from(p: FfiTimePeriod) -> Self {
        match p {
            FfiTimePeriod::Today => TimePeriod::Today,
            FfiTimePeriod::Yesterday => TimePeriod::Yesterday,
            FfiTimePeriod::LastWeek => TimePeriod::LastWeek,
        }
    }
}

// ============================================================================
// Sync Status
// ============================================================================

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiStatusReport {
    pub total_count: u64,
    pub pending_count: u64,
    pub synced_count: u64,
    pub failed_count: u64,
    pub last_sample_at_ms: Option<i64>,
    pub last_sync_at_ms: Option<i64>,
    pub last_sync_count: u32,
    pub last_message: Option<String>,
    pub last_attempt_succeeded: Option<bool>,
}

impl From<StatusReport> for FfiStatusReport {
    fn from(r: StatusReport) -> Self {
        Self {
            total_count: r.total_count,
            pending_count: r.pending_count,
            synced_count: r.synced_count,
            failed_count: r.failed_count,
            last_sample_at_ms: r.last_sample_at.map(to_ms),
            last_sync_at_ms: r.last_sync_at.map(to_ms),
            last_sync_count: r.last_sync_count,
            last_message: r.last_message,
            last_attempt_succeeded: r.last_attempt_succeeded,
        }
    }
}

/// Result of a manual sync
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum FfiSyncResult {
    /// A tick was already running, or backoff is in effect
    Skipped { reason: String },
    NothingToSync,
    Synced { synced_count: u32, message: String },
    Failed { message: String },
    AuthExpired,
}

impl From<TickResult> for FfiSyncResult {
    fn from(r: TickResult) -> Self {
        match r {
            TickResult::Skipped(SkipReason::InFlight) => Self::Skipped {
                reason: "sync already in progress".to_string(),
            },
            TickResult::Skipped(SkipReason::BackingOff { remaining }) => Self::Skipped {
                reason: format!("retrying in {}s", remaining.num_seconds().max(1)),
            },
            TickResult::Idle => Self::NothingToSync,
            TickResult::Synced(o) => Self::Synced {
                synced_count: o.synced_count,
                message: o.message,
            },
            TickResult::Failed(o) => Self::Failed { message: o.message },
            TickResult::AuthExpired => Self::AuthExpired,
        }
    }
}

// ============================================================================
// Social Feed
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiFeedSource {
    Facebook,
    Twitter,
}

impl From<FeedSource> for FfiFeedSource {
    fn from(s: FeedSource) -> Self {
        match s {
            FeedSource::Facebook => Self::Facebook,
            FeedSource::Twitter => Self::Twitter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiFeedFilter {
    All,
    Facebook,
    Twitter,
}

impl From<FfiFeedFilter> for FeedFilter {
    fn from(f: FfiFeedFilter) -> Self {
        match f {
            FfiFeedFilter::All => FeedFilter::All,
            FfiFeedFilter::Facebook => FeedFilter::Facebook,
            FfiFeedFilter::Twitter => FeedFilter::Twitter,
        }
    }
}

/// Flattened feed entry for list rendering
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiFeedItem {
    pub source: FfiFeedSource,
    pub id: String,
    pub created_at_ms: i64,
    pub text: String,
    /// Facebook author name or Twitter screen name
    pub author: Option<String>,
    pub link: Option<String>,
    pub is_photo: bool,
}

impl From<FeedItem> for FfiFeedItem {
    fn from(item: FeedItem) -> Self {
        let source = item.source().into();
        let created_at_ms = to_ms(item.created_at());
        let text = item.text().to_string();
        match item {
            FeedItem::Facebook(post) => Self {
                source,
                created_at_ms,
                text,
                is_photo: post.is_photo(),
                link: Some(post.link).filter(|l| !l.is_empty()),
                author: post.author,
                id: post.id,
            },
            FeedItem::Twitter(tweet) => Self {
                source,
                created_at_ms,
                text,
                is_photo: false,
                link: None,
                author: tweet.screen_name,
                id: tweet.id,
            },
        }
    }
}
