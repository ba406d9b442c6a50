//! # HAT Sync
//!
//! Platform-independent rules for a HAT (Hub of All Things) mobile client.
//!
//! This library provides:
//! - Ingest filtering of raw location fixes (accuracy bound, distance filter)
//! - Sync block selection and outcome records for incremental uploads
//! - Retry and backoff policy for failed uploads
//! - Token expiry inspection
//! - Social feed parsing, merging and pagination for Facebook and Twitter plugs
//!
//! Storage, HTTP and the FFI surface live in the `hatrs` crate.
//!
//! ## Features
//!
//! - **`synthetic`** - Deterministic location trails for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use hatsync::{IngestPolicy, LocationFix, LocationPreferences};
//!
//! let policy = IngestPolicy::new(LocationPreferences {
//!     desired_accuracy: 10.0,
//!     distance_filter: None,
//! });
//!
//! let good = LocationFix::new(51.5074, -0.1278, 5.0, Utc::now());
//! let poor = LocationFix::new(51.5074, -0.1278, 50.0, Utc::now());
//!
//! assert!(policy.check(&good, None).is_ok());
//! assert!(policy.check(&poor, None).is_err());
//! ```

// Unified error handling
pub mod error;
pub use error::{FixRejection, HatError, OptionExt, Result};

// Samples, blocks and outcomes
pub mod types;
pub use types::{LocationFix, LocationSample, StatusReport, SyncBlock, SyncOutcome, SyncStatus};

// Preferences, timers and retry policy
pub mod config;
pub use config::{
    BackoffPolicy, HatEndpoint, LocationPreferences, RetryPolicy, SyncConfig,
    DEFAULT_BLOCK_SIZE, DEFAULT_DESIRED_ACCURACY_METERS, DEFAULT_STATUS_INTERVAL_SECS,
    DEFAULT_SYNC_INTERVAL_SECS, MAX_BLOCK_SIZE,
};

// Geographic utilities (distance, coordinate validation)
pub mod geo_utils;

// Fix acceptance rules
pub mod ingest;
pub use ingest::{latest_fix, IngestPolicy};

// JWT expiry inspection
pub mod token;
pub use token::{token_state, TokenState};

// Map display windows
pub mod period;
pub use period::{TimePeriod, TimeRange};

// Social feed aggregation
pub mod feed;
pub use feed::{
    oldest_created_at, parse_page, FacebookPost, FeedCursor, FeedFilter, FeedItem, FeedSource,
    HatRecord, PageRequest, SocialFeed, Tweet, EXPANDED_PAGE_LIMIT, INITIAL_PAGE_LIMIT,
};

// Test data generation
#[cfg(feature = "synthetic")]
pub mod synthetic;
