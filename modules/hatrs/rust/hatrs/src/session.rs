//! Tracking session: the composition root for location capture and sync.
//!
//! Owns the store, walker, reporter and timers, and reacts to app lifecycle
//! events. Nothing here is global; the FFI layer holds one session per
//! logged-in user.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, TimeZone};
use hatsync::{
    HatError, IngestPolicy, LocationFix, LocationPreferences, LocationSample, StatusReport,
    SyncConfig, TimePeriod, latest_fix,
};
use log::{debug, info, warn};

use crate::persistence::{SharedStore, lock_store};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::status::StatusReporter;
use crate::walker::{LocationUploader, SyncWalker, TickResult, TokenStore};

// ============================================================================
// Collaborators
// ============================================================================

/// Platform location manager.
pub trait LocationSource: Send + Sync {
    fn start(&self, preferences: &LocationPreferences);
    fn stop(&self);
}

/// UI callbacks. Called from timer threads.
pub trait SyncListener: Send + Sync {
    fn on_count_changed(&self, count: u64);
    fn on_sync_feedback(&self, success: bool, message: &str);
    fn on_status(&self, report: &StatusReport);
    fn on_auth_expired(&self);
}

/// Everything the session talks to.
pub struct SessionCollaborators {
    pub uploader: Arc<dyn LocationUploader>,
    pub tokens: Arc<dyn TokenStore>,
    pub location: Arc<dyn LocationSource>,
    pub listener: Arc<dyn SyncListener>,
    pub scheduler: Arc<dyn Scheduler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Background,
}

struct SessionState {
    app_state: AppState,
    policy: IngestPolicy,
    tracking: bool,
    timers: Vec<TaskHandle>,
}

/// Timer names
const STATUS_TIMER: &str = "status";
const SYNC_TIMER: &str = "sync";

// ============================================================================
// Tracking Session
// ============================================================================

pub struct TrackingSession {
    store: SharedStore,
    walker: Arc<SyncWalker>,
    reporter: Arc<StatusReporter>,
    tokens: Arc<dyn TokenStore>,
    location: Arc<dyn LocationSource>,
    listener: Arc<dyn SyncListener>,
    scheduler: Arc<dyn Scheduler>,
    config: SyncConfig,
    state: Mutex<SessionState>,
}

impl TrackingSession {
    pub fn new(
        store: SharedStore,
        collaborators: SessionCollaborators,
        config: SyncConfig,
        preferences: LocationPreferences,
    ) -> hatsync::Result<Self> {
        config.validate()?;
        preferences.validate()?;

        let SessionCollaborators {
            uploader,
            tokens,
            location,
            listener,
            scheduler,
        } = collaborators;

        let walker = Arc::new(SyncWalker::new(
            Arc::clone(&store),
            uploader,
            Arc::clone(&tokens),
            Arc::clone(&listener),
            config,
        ));
        let reporter = Arc::new(StatusReporter::new(Arc::clone(&store)));

        Ok(Self {
            store,
            walker,
            reporter,
            tokens,
            location,
            listener,
            scheduler,
            config,
            state: Mutex::new(SessionState {
                app_state: AppState::Active,
                policy: IngestPolicy::new(preferences),
                tracking: false,
                timers: Vec::new(),
            }),
        })
    }

    fn state(&self) -> hatsync::Result<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| HatError::storage("session state lock poisoned"))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start location tracking and both timers.
    pub fn start(&self) -> hatsync::Result<()> {
        self.activate()?;
        info!("[TrackingSession] Started");
        Ok(())
    }

    /// Store the token handed over by the login flow, then start.
    pub fn login(&self, token: String) -> hatsync::Result<()> {
        self.tokens.set_token(token);
        self.walker.reset_auth_prompt();
        self.start()
    }

    /// Timers stop; location keeps running and ingest keeps writing.
    pub fn did_enter_background(&self) -> hatsync::Result<()> {
        let mut state = self.state()?;
        state.app_state = AppState::Background;
        Self::stop_timers(&mut state);
        info!("[TrackingSession] Entered background");
        Ok(())
    }

    pub fn did_become_active(&self) -> hatsync::Result<()> {
        self.activate()?;
        info!("[TrackingSession] Became active");
        Ok(())
    }

    /// Mark active, (re)start location and make sure timers run.
    ///
    /// Location callbacks run without the state lock held.
    fn activate(&self) -> hatsync::Result<()> {
        let (preferences, was_tracking) = {
            let mut state = self.state()?;
            state.app_state = AppState::Active;
            self.start_timers(&mut state)?;
            let was_tracking = std::mem::replace(&mut state.tracking, true);
            (*state.policy.preferences(), was_tracking)
        };
        self.restart_location(&preferences, was_tracking);
        Ok(())
    }

    /// Stop everything and forget the token. With `wipe`, stored samples and
    /// sync history are deleted too.
    pub fn logout(&self, wipe: bool) -> hatsync::Result<()> {
        let was_tracking = {
            let mut state = self.state()?;
            Self::stop_timers(&mut state);
            std::mem::replace(&mut state.tracking, false)
        };
        if was_tracking {
            self.location.stop();
        }
        self.tokens.clear();

        if wipe {
            lock_store(&self.store)?
                .clear()
                .map_err(HatError::storage)?;
        }
        info!("[TrackingSession] Logged out (wipe={})", wipe);
        Ok(())
    }

    /// Apply new preferences by restarting the location source.
    pub fn update_preferences(&self, preferences: LocationPreferences) -> hatsync::Result<()> {
        preferences.validate()?;
        let was_tracking = {
            let mut state = self.state()?;
            state.policy = IngestPolicy::new(preferences);
            std::mem::replace(&mut state.tracking, true)
        };
        self.restart_location(&preferences, was_tracking);
        info!(
            "[TrackingSession] Preferences updated: accuracy={}m",
            preferences.desired_accuracy
        );
        Ok(())
    }

    fn restart_location(&self, preferences: &LocationPreferences, was_tracking: bool) {
        if was_tracking {
            self.location.stop();
        }
        self.location.start(preferences);
    }

    fn start_timers(&self, state: &mut SessionState) -> hatsync::Result<()> {
        if !state.timers.is_empty() {
            return Ok(());
        }

        let reporter = Arc::clone(&self.reporter);
        let listener = Arc::clone(&self.listener);
        let status = self.scheduler.schedule_repeating(
            STATUS_TIMER,
            self.config.status_interval(),
            Arc::new(move || reporter.publish(listener.as_ref())),
        )?;
        state.timers.push(status);

        let walker = Arc::clone(&self.walker);
        let sync = self.scheduler.schedule_repeating(
            SYNC_TIMER,
            self.config.sync_interval(),
            Arc::new(move || {
                walker.tick();
            }),
        )?;
        state.timers.push(sync);
        Ok(())
    }

    fn stop_timers(state: &mut SessionState) {
        for mut timer in state.timers.drain(..) {
            timer.cancel();
        }
    }

    pub fn app_state(&self) -> AppState {
        self.state
            .lock()
            .map(|s| s.app_state)
            .unwrap_or(AppState::Background)
    }

    pub fn timers_running(&self) -> bool {
        self.state
            .lock()
            .map(|s| !s.timers.is_empty())
            .unwrap_or(false)
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Ingest the newest of a batch of fixes.
    ///
    /// Rejected fixes are dropped and yield `Ok(None)`. The count listener
    /// is only notified while the app is active.
    pub fn on_location_update(
        &self,
        fixes: &[LocationFix],
    ) -> hatsync::Result<Option<LocationSample>> {
        let Some(fix) = latest_fix(fixes) else {
            return Ok(None);
        };
        let (policy, app_state) = {
            let state = self.state()?;
            (state.policy, state.app_state)
        };

        let (sample, count) = {
            let mut store = lock_store(&self.store)?;
            let last = if policy.preferences().distance_filter.is_some() {
                store.last_sample().map_err(HatError::storage)?
            } else {
                None
            };
            if policy.check(fix, last.as_ref()).is_err() {
                return Ok(None);
            }
            let sample = store.insert(fix).map_err(HatError::storage)?;
            let count = store.count().map_err(HatError::storage)?;
            (sample, count)
        };

        if app_state == AppState::Active {
            self.listener.on_count_changed(count);
        } else {
            debug!("[TrackingSession] Background ingest, {} samples", count);
        }
        Ok(Some(sample))
    }

    // ========================================================================
    // Queries & Manual Actions
    // ========================================================================

    /// Run one walker tick on the calling thread.
    pub fn sync_now(&self) -> TickResult {
        self.walker.tick()
    }

    pub fn walker(&self) -> &SyncWalker {
        &self.walker
    }

    pub fn status(&self) -> hatsync::Result<StatusReport> {
        self.reporter.report()
    }

    /// Samples for a map filter, using the device's time zone.
    pub fn samples_for_period(&self, period: TimePeriod) -> hatsync::Result<Vec<LocationSample>> {
        self.samples_for_period_at(period, &Local::now())
    }

    pub fn samples_for_period_at<Tz: TimeZone>(
        &self,
        period: TimePeriod,
        now: &DateTime<Tz>,
    ) -> hatsync::Result<Vec<LocationSample>> {
        let range = period.range(now);
        lock_store(&self.store)?
            .samples_between(&range)
            .map_err(HatError::storage)
    }

    pub fn requeue_failed(&self) -> hatsync::Result<usize> {
        let n = lock_store(&self.store)?
            .requeue_failed()
            .map_err(HatError::storage)?;
        if n > 0 {
            warn!("[TrackingSession] {} failed samples returned to pending", n);
        }
        Ok(n)
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            Self::stop_timers(&mut state);
        }
    }
}
