//! Sync walker: uploads Pending samples block by block.
//!
//! Each tick selects the oldest Pending samples, uploads them without holding
//! the store lock and records the outcome. A failed block stays Pending and is
//! picked again by the next tick, so blocks advance strictly in capture order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use hatsync::{HatError, SyncBlock, SyncConfig, SyncOutcome, token_state};
use log::{debug, error, info, warn};

use crate::http::UploadResponse;
use crate::persistence::{SharedStore, lock_store};
use crate::session::SyncListener;

// ============================================================================
// Collaborators
// ============================================================================

/// Sends a block to the HAT.
pub trait LocationUploader: Send + Sync {
    fn upload(&self, token: &str, block: &SyncBlock) -> hatsync::Result<UploadResponse>;
}

/// Keychain-like holder of the HAT auth token.
pub trait TokenStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear(&self);
}

/// Token store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn set_token(&self, token: String) {
        if let Ok(mut t) = self.token.lock() {
            *t = Some(token);
        }
    }

    fn clear(&self) {
        if let Ok(mut t) = self.token.lock() {
            *t = None;
        }
    }
}

// ============================================================================
// Tick Results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Another tick is still uploading
    InFlight,
    /// Waiting out the backoff after consecutive failures
    BackingOff { remaining: Duration },
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    Skipped(SkipReason),
    /// No Pending samples
    Idle,
    Synced(SyncOutcome),
    Failed(SyncOutcome),
    AuthExpired,
}

#[derive(Debug, Default)]
struct BackoffState {
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag when a tick ends, including on panic.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Sync Walker
// ============================================================================

pub struct SyncWalker {
    store: SharedStore,
    uploader: Arc<dyn LocationUploader>,
    tokens: Arc<dyn TokenStore>,
    listener: Arc<dyn SyncListener>,
    config: SyncConfig,
    in_flight: AtomicBool,
    backoff: Mutex<BackoffState>,
    /// Token (or its absence) the UI was last asked to replace
    auth_prompted: Mutex<Option<Option<String>>>,
}

impl SyncWalker {
    pub fn new(
        store: SharedStore,
        uploader: Arc<dyn LocationUploader>,
        tokens: Arc<dyn TokenStore>,
        listener: Arc<dyn SyncListener>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            uploader,
            tokens,
            listener,
            config,
            in_flight: AtomicBool::new(false),
            backoff: Mutex::new(BackoffState::default()),
            auth_prompted: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff
            .lock()
            .map(|b| b.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn tick(&self) -> TickResult {
        self.tick_at(Utc::now())
    }

    /// Run one tick as if the clock read `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickResult {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[SyncWalker] Previous tick still in flight, skipping");
            return TickResult::Skipped(SkipReason::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(remaining) = self.backoff_remaining(now) {
            debug!("[SyncWalker] Backing off for another {:?}", remaining);
            return TickResult::Skipped(SkipReason::BackingOff { remaining });
        }

        match self.run(now) {
            Ok(result) => result,
            Err(e) => {
                error!("[SyncWalker] Tick failed: {}", e);
                let outcome = SyncOutcome::failed(e.user_message(), now);
                self.finish(&outcome);
                TickResult::Failed(outcome)
            }
        }
    }

    fn run(&self, now: DateTime<Utc>) -> hatsync::Result<TickResult> {
        let Some(token) = self.tokens.token() else {
            return Ok(self.auth_expired(None, now));
        };
        if token_state(&token, now).is_expired() {
            return Ok(self.auth_expired(Some(&token), now));
        }

        let block = {
            let store = lock_store(&self.store)?;
            store
                .next_pending_block(self.config.block_size)
                .map_err(HatError::storage)?
        };
        let Some(block) = block else {
            debug!("[SyncWalker] Nothing to sync");
            return Ok(TickResult::Idle);
        };

        debug!(
            "[SyncWalker] Uploading {} samples ({} .. {})",
            block.len(),
            block.first_captured_at(),
            block.last_captured_at()
        );

        // Upload without the store lock so ingest keeps running
        match self.uploader.upload(&token, &block) {
            Ok(response) => self.on_uploaded(&block, response, now),
            Err(HatError::AuthExpired) => Ok(self.auth_expired(Some(&token), now)),
            Err(e) => self.on_upload_failed(&block, e, now),
        }
    }

    fn on_uploaded(
        &self,
        block: &SyncBlock,
        response: UploadResponse,
        now: DateTime<Utc>,
    ) -> hatsync::Result<TickResult> {
        if let Some(token) = response.renewed_token {
            debug!("[SyncWalker] Storing renewed token");
            self.tokens.set_token(token);
        }

        self.reset_auth_prompt();

        let synced = {
            let mut store = lock_store(&self.store)?;
            store
                .mark_synced(&block.ids(), now)
                .map_err(HatError::storage)?
        };
        self.reset_backoff();

        // Store was cleared while the upload ran
        if synced == 0 {
            warn!("[SyncWalker] Uploaded block no longer pending, nothing recorded");
            return Ok(TickResult::Idle);
        }

        let outcome = SyncOutcome::succeeded(synced as u32, now);
        info!("[SyncWalker] {}", outcome.message);
        self.finish(&outcome);
        Ok(TickResult::Synced(outcome))
    }

    fn on_upload_failed(
        &self,
        block: &SyncBlock,
        err: HatError,
        now: DateTime<Utc>,
    ) -> hatsync::Result<TickResult> {
        let message = err.user_message();
        warn!(
            "[SyncWalker] Upload of {} samples failed: {}",
            block.len(),
            message
        );

        {
            let mut store = lock_store(&self.store)?;
            store
                .record_failure(&block.ids(), &message, self.config.retry.max_attempts)
                .map_err(HatError::storage)?;
        }
        self.note_failure(now);

        let outcome = SyncOutcome::failed(message, now);
        self.finish(&outcome);
        Ok(TickResult::Failed(outcome))
    }

    /// Ask for re-authentication once per rejected token.
    fn auth_expired(&self, token: Option<&str>, now: DateTime<Utc>) -> TickResult {
        let key = token.map(str::to_string);
        let first = match self.auth_prompted.lock() {
            Ok(mut prompted) => {
                let first = (*prompted).as_ref() != Some(&key);
                *prompted = Some(key);
                first
            }
            Err(_) => true,
        };

        if first {
            info!(
                "[SyncWalker] Auth token {}, asking for login",
                if token.is_some() { "expired" } else { "missing" }
            );
            self.listener.on_auth_expired();
            self.finish(&SyncOutcome::failed(HatError::AuthExpired.to_string(), now));
        } else {
            debug!("[SyncWalker] Still waiting for login");
        }
        TickResult::AuthExpired
    }

    /// Forget the last re-authentication prompt, e.g. after a login.
    pub fn reset_auth_prompt(&self) {
        if let Ok(mut prompted) = self.auth_prompted.lock() {
            *prompted = None;
        }
    }

    /// Persist the outcome and tell the UI.
    fn finish(&self, outcome: &SyncOutcome) {
        match lock_store(&self.store) {
            Ok(mut store) => {
                if let Err(e) = store.record_outcome(outcome) {
                    error!("[SyncWalker] Failed to record outcome: {}", e);
                }
            }
            Err(e) => error!("[SyncWalker] {}", e),
        }
        self.listener
            .on_sync_feedback(outcome.success, &outcome.message);
    }

    // ========================================================================
    // Backoff
    // ========================================================================

    fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let policy = self.config.retry.backoff?;
        let state = self.backoff.lock().ok()?;
        let last = state.last_failure_at?;

        let delay = Duration::from_std(policy.delay_for(state.consecutive_failures)).ok()?;
        let resume_at = last + delay;
        (now < resume_at).then(|| resume_at - now)
    }

    fn note_failure(&self, now: DateTime<Utc>) {
        if let Ok(mut state) = self.backoff.lock() {
            state.consecutive_failures += 1;
            state.last_failure_at = Some(now);
        }
    }

    fn reset_backoff(&self) {
        if let Ok(mut state) = self.backoff.lock() {
            *state = BackoffState::default();
        }
    }
}
