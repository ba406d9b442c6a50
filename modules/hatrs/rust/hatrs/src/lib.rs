//! hatrs - Mobile core for HAT location sync
//!
//! This crate provides:
//! - SQLite sample store
//! - Sync walker, status reporter and interval scheduler
//! - HTTP client for the HAT data API
//! - UniFFI bindings for iOS/Android

// Re-export all public types from hatsync
pub use hatsync::*;

// Schema migrations
pub mod migrations;

// Persistence layer with SQLite storage
pub mod persistence;
pub use persistence::{SampleStore, SharedStore, lock_store};

// HTTP client for the HAT API
pub mod http;
pub use http::{BlockingHatClient, FeedPage, HatClient, LocationPayload, UploadResponse};

// Sync walker and its collaborators
pub mod walker;
pub use walker::{
    LocationUploader, MemoryTokenStore, SkipReason, SyncWalker, TickResult, TokenStore,
};

// Status aggregates
pub mod status;
pub use status::StatusReporter;

// Repeating timers
pub mod scheduler;
pub use scheduler::{Scheduler, Task, TaskHandle, ThreadScheduler};

// Composition root
pub mod session;
pub use session::{AppState, LocationSource, SessionCollaborators, SyncListener, TrackingSession};

// Social feed loading
pub mod social;
pub use social::{FeedFetcher, FeedLoader};

// FFI bindings for mobile platforms
pub mod ffi;
pub mod ffi_types;

uniffi::setup_scaffolding!();

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("hatrs"),
    );
}

/// Initialize logging for iOS
#[cfg(target_os = "ios")]
pub(crate) fn init_logging() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = oslog::OsLogger::new("org.hatdex.hatrs")
            .level_filter(log::LevelFilter::Debug)
            .init();
    });
}

#[cfg(not(any(target_os = "android", target_os = "ios")))]
pub(crate) fn init_logging() {
    // No-op on other platforms; tests install env_logger
}
