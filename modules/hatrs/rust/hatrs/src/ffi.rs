//! FFI bindings for mobile platforms (iOS/Android).
//!
//! This module provides the UniFFI bindings that expose the tracking session
//! to Kotlin and Swift. The platform owns one [`HatSession`] object; the
//! location manager, keychain and UI are passed in as callback interfaces.

use std::sync::Arc;

use hatsync::{FeedSource, HatEndpoint, LocationFix, StatusReport, SyncConfig, token_state};
use log::info;

use crate::ffi_types::{
    FfiFeedFilter, FfiFeedItem, FfiHatError, FfiLocationFix, FfiLocationPreferences,
    FfiLocationSample, FfiStatusReport, FfiSyncResult, FfiTimePeriod,
};
use crate::http::BlockingHatClient;
use crate::init_logging;
use crate::persistence::SampleStore;
use crate::scheduler::ThreadScheduler;
use crate::session::{LocationSource, SessionCollaborators, SyncListener, TrackingSession};
use crate::social::FeedLoader;
use crate::walker::TokenStore;

// ============================================================================
// Callback Interfaces
// ============================================================================

/// UI callbacks. Invoked from background threads.
#[uniffi::export(callback_interface)]
pub trait FfiSyncListener: Send + Sync {
    /// Sample count after an ingest while the app is active
    fn on_count_changed(&self, count: u64);
    /// Result of every upload attempt
    fn on_sync_feedback(&self, success: bool, message: String);
    /// Periodic status refresh
    fn on_status(&self, report: FfiStatusReport);
    /// The user must log in again
    fn on_auth_expired(&self);
}

/// Keychain access for the HAT token.
#[uniffi::export(callback_interface)]
pub trait FfiTokenStore: Send + Sync {
    fn get_token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear_token(&self);
}

/// Platform location manager.
#[uniffi::export(callback_interface)]
pub trait FfiLocationSource: Send + Sync {
    fn start_updates(&self, preferences: FfiLocationPreferences);
    fn stop_updates(&self);
}

struct ListenerAdapter(Box<dyn FfiSyncListener>);

impl SyncListener for ListenerAdapter {
    fn on_count_changed(&self, count: u64) {
        self.0.on_count_changed(count);
    }

    fn on_sync_feedback(&self, success: bool, message: &str) {
        self.0.on_sync_feedback(success, message.to_string());
    }

    fn on_status(&self, report: &StatusReport) {
        self.0.on_status(report.clone().into());
    }

    fn on_auth_expired(&self) {
        self.0.on_auth_expired();
    }
}

struct TokenStoreAdapter(Box<dyn FfiTokenStore>);

impl TokenStore for TokenStoreAdapter {
    fn token(&self) -> Option<String> {
        self.0.get_token()
    }

    fn set_token(&self, token: String) {
        self.0.set_token(token);
    }

    fn clear(&self) {
        self.0.clear_token();
    }
}

struct LocationSourceAdapter(Box<dyn FfiLocationSource>);

impl LocationSource for LocationSourceAdapter {
    fn start(&self, preferences: &hatsync::LocationPreferences) {
        self.0.start_updates((*preferences).into());
    }

    fn stop(&self) {
        self.0.stop_updates();
    }
}

// ============================================================================
// Session Object
// ============================================================================

#[derive(uniffi::Object)]
pub struct HatSession {
    session: TrackingSession,
    feed: FeedLoader,
}

#[uniffi::export]
impl HatSession {
    /// Open the sample store and wire up the session. Timers start on
    /// [`HatSession::start`].
    ///
    /// `config_json` takes a partial `SyncConfig` object; missing fields use
    /// defaults.
    #[uniffi::constructor]
    pub fn new(
        db_path: String,
        hat_domain: String,
        config_json: Option<String>,
        preferences: FfiLocationPreferences,
        listener: Box<dyn FfiSyncListener>,
        token_store: Box<dyn FfiTokenStore>,
        location_source: Box<dyn FfiLocationSource>,
    ) -> Result<Arc<Self>, FfiHatError> {
        init_logging();
        info!("[HatSession] Creating session for {}", hat_domain);

        let config = match config_json {
            Some(json) => SyncConfig::from_json(&json)?,
            None => SyncConfig::default(),
        };
        let store = SampleStore::open(&db_path)?.into_shared();
        let client = Arc::new(BlockingHatClient::new(HatEndpoint::new(&hat_domain)?)?);
        let tokens: Arc<dyn TokenStore> = Arc::new(TokenStoreAdapter(token_store));

        let session = TrackingSession::new(
            store,
            SessionCollaborators {
                uploader: client.clone(),
                tokens: Arc::clone(&tokens),
                location: Arc::new(LocationSourceAdapter(location_source)),
                listener: Arc::new(ListenerAdapter(listener)),
                scheduler: Arc::new(ThreadScheduler),
            },
            config,
            preferences.into(),
        )?;
        let feed = FeedLoader::new(client, tokens);

        Ok(Arc::new(Self { session, feed }))
    }

    pub fn start(&self) -> Result<(), FfiHatError> {
        Ok(self.session.start()?)
    }

    pub fn login(&self, token: String) -> Result<(), FfiHatError> {
        Ok(self.session.login(token)?)
    }

    pub fn logout(&self, wipe: bool) -> Result<(), FfiHatError> {
        self.feed.clear();
        Ok(self.session.logout(wipe)?)
    }

    pub fn did_enter_background(&self) -> Result<(), FfiHatError> {
        Ok(self.session.did_enter_background()?)
    }

    pub fn did_become_active(&self) -> Result<(), FfiHatError> {
        Ok(self.session.did_become_active()?)
    }

    /// Returns the stored sample, or `None` when the fix was rejected.
    pub fn on_location_update(
        &self,
        fixes: Vec<FfiLocationFix>,
    ) -> Result<Option<FfiLocationSample>, FfiHatError> {
        let fixes: Vec<LocationFix> = fixes.into_iter().map(Into::into).collect();
        Ok(self.session.on_location_update(&fixes)?.map(Into::into))
    }

    pub fn update_preferences(&self, preferences: FfiLocationPreferences) -> Result<(), FfiHatError> {
        Ok(self.session.update_preferences(preferences.into())?)
    }

    pub fn sync_now(&self) -> FfiSyncResult {
        self.session.sync_now().into()
    }

    pub fn status(&self) -> Result<FfiStatusReport, FfiHatError> {
        Ok(self.session.status()?.into())
    }

    pub fn samples_for_period(
        &self,
        period: FfiTimePeriod,
    ) -> Result<Vec<FfiLocationSample>, FfiHatError> {
        Ok(self
            .session
            .samples_for_period(period.into())?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    pub fn requeue_failed(&self) -> Result<u32, FfiHatError> {
        Ok(self.session.requeue_failed()? as u32)
    }

    /// Fetch new posts from both plugs. Returns how many were added.
    pub fn refresh_feed(&self) -> Result<u32, FfiHatError> {
        let added = self
            .feed
            .refresh(&[FeedSource::Facebook, FeedSource::Twitter])?;
        Ok(added as u32)
    }

    pub fn feed_items(&self, filter: FfiFeedFilter) -> Vec<FfiFeedItem> {
        self.feed
            .items(filter.into())
            .into_iter()
            .map(Into::into)
            .collect()
    }
}

/// Whether a HAT token's `exp` claim has passed.
#[uniffi::export]
pub fn ffi_token_is_expired(token: String) -> bool {
    token_state(&token, chrono::Utc::now()).is_expired()
}
