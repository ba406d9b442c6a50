//! Tracking session lifecycle: ingest, timers, login/logout.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, TimeZone};
use common::{
    FakeLocationSource, FakeUploader, LocationCall, ManualScheduler, RecordingListener, at, fix,
    init_test_logging,
};
use hatrs::{
    AppState, LocationPreferences, MemoryTokenStore, SampleStore, SessionCollaborators,
    SharedStore, SyncConfig, SyncStatus, TickResult, TimePeriod, TokenStore, TrackingSession,
};

struct Fixture {
    session: TrackingSession,
    store: SharedStore,
    uploader: Arc<FakeUploader>,
    tokens: Arc<MemoryTokenStore>,
    location: Arc<FakeLocationSource>,
    listener: Arc<RecordingListener>,
    scheduler: Arc<ManualScheduler>,
}

fn prefs(desired_accuracy: f64) -> LocationPreferences {
    LocationPreferences {
        desired_accuracy,
        distance_filter: None,
    }
}

fn fixture(preferences: LocationPreferences) -> Fixture {
    init_test_logging();
    let store = SampleStore::in_memory().unwrap().into_shared();
    let uploader = Arc::new(FakeUploader::new());
    let tokens = Arc::new(MemoryTokenStore::new(Some("token".to_string())));
    let location = Arc::new(FakeLocationSource::default());
    let listener = Arc::new(RecordingListener::default());
    let scheduler = Arc::new(ManualScheduler::default());

    let session = TrackingSession::new(
        Arc::clone(&store),
        SessionCollaborators {
            uploader: uploader.clone(),
            tokens: tokens.clone(),
            location: location.clone(),
            listener: listener.clone(),
            scheduler: scheduler.clone(),
        },
        SyncConfig::default(),
        preferences,
    )
    .unwrap();

    Fixture {
        session,
        store,
        uploader,
        tokens,
        location,
        listener,
        scheduler,
    }
}

fn count(store: &SharedStore, status: SyncStatus) -> u64 {
    store.lock().unwrap().count_by_status(status).unwrap()
}

// ============================================================================
// Ingest
// ============================================================================

#[test]
fn test_accurate_fix_is_stored_and_counted() {
    let f = fixture(prefs(10.0));
    f.session.start().unwrap();

    let sample = f.session.on_location_update(&[fix(0, 5.0)]).unwrap();
    let sample = sample.expect("fix within threshold should be stored");
    assert_eq!(sample.sync_status, SyncStatus::Pending);
    assert_eq!(sample.attempts, 0);
    assert_eq!(f.listener.count_changes(), vec![1]);
}

#[test]
fn test_inaccurate_fix_is_dropped_silently() {
    let f = fixture(prefs(10.0));
    f.session.start().unwrap();

    assert_eq!(f.session.on_location_update(&[fix(0, 50.0)]).unwrap(), None);
    assert_eq!(f.store.lock().unwrap().count().unwrap(), 0);
    assert!(f.listener.count_changes().is_empty());
}

#[test]
fn test_only_newest_fix_of_a_batch_is_ingested() {
    let f = fixture(prefs(10.0));
    f.session.start().unwrap();

    let sample = f
        .session
        .on_location_update(&[fix(0, 5.0), fix(1, 6.0), fix(2, 7.0)])
        .unwrap()
        .unwrap();
    assert_eq!(sample.captured_at, at(2));
    assert_eq!(f.store.lock().unwrap().count().unwrap(), 1);

    assert_eq!(f.session.on_location_update(&[]).unwrap(), None);
}

#[test]
fn test_background_ingest_stores_without_notifying() {
    let f = fixture(prefs(10.0));
    f.session.start().unwrap();
    f.session.did_enter_background().unwrap();

    assert!(f.session.on_location_update(&[fix(0, 5.0)]).unwrap().is_some());
    assert_eq!(f.store.lock().unwrap().count().unwrap(), 1);
    assert!(f.listener.count_changes().is_empty());

    f.session.did_become_active().unwrap();
    f.session.on_location_update(&[fix(1, 5.0)]).unwrap();
    assert_eq!(f.listener.count_changes(), vec![2]);
}

#[test]
fn test_distance_filter_drops_nearby_fixes() {
    let f = fixture(LocationPreferences {
        desired_accuracy: 50.0,
        distance_filter: Some(100.0),
    });
    f.session.start().unwrap();

    let near = hatrs::LocationFix::new(51.5001, -0.12, 5.0, at(1));
    let far = hatrs::LocationFix::new(51.51, -0.12, 5.0, at(2));

    assert!(f.session.on_location_update(&[fix(0, 5.0)]).unwrap().is_some());
    assert!(f.session.on_location_update(&[near]).unwrap().is_none());
    assert!(f.session.on_location_update(&[far]).unwrap().is_some());
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_start_schedules_status_and_sync_timers() {
    let f = fixture(prefs(100.0));
    assert!(!f.session.timers_running());

    f.session.start().unwrap();
    assert!(f.session.timers_running());

    let mut names: Vec<String> = f
        .scheduler
        .live_tasks()
        .into_iter()
        .map(|(name, interval)| {
            assert_eq!(interval, Duration::from_secs(10));
            name
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["status", "sync"]);
    assert_eq!(f.location.calls(), vec![LocationCall::Start(prefs(100.0))]);
}

#[test]
fn test_background_stops_timers_and_active_restarts_them() {
    let f = fixture(prefs(100.0));
    f.session.start().unwrap();

    f.session.did_enter_background().unwrap();
    assert_eq!(f.session.app_state(), AppState::Background);
    assert!(!f.session.timers_running());
    assert!(f.scheduler.live_tasks().is_empty());
    assert_eq!(f.scheduler.fire("sync"), 0);

    f.session.did_become_active().unwrap();
    assert_eq!(f.session.app_state(), AppState::Active);
    assert_eq!(f.scheduler.live_tasks().len(), 2);
}

#[test]
fn test_repeated_activation_does_not_duplicate_timers() {
    let f = fixture(prefs(100.0));
    f.session.start().unwrap();
    f.session.did_become_active().unwrap();
    f.session.did_become_active().unwrap();
    assert_eq!(f.scheduler.live_tasks().len(), 2);
}

#[test]
fn test_sync_timer_uploads_pending_samples() {
    let f = fixture(prefs(100.0));
    f.session.start().unwrap();
    for i in 0..3 {
        f.session.on_location_update(&[fix(i, 5.0)]).unwrap();
    }

    assert_eq!(f.scheduler.fire("sync"), 1);
    assert_eq!(f.uploader.uploads().len(), 1);
    assert_eq!(count(&f.store, SyncStatus::Synced), 3);
    assert_eq!(
        f.listener.feedback(),
        vec![(true, "Synced 3 points".to_string())]
    );
}

#[test]
fn test_status_timer_publishes_report() {
    let f = fixture(prefs(100.0));
    f.session.start().unwrap();
    f.session.on_location_update(&[fix(0, 5.0)]).unwrap();

    assert_eq!(f.scheduler.fire("status"), 1);
    let report = f
        .listener
        .events()
        .into_iter()
        .find_map(|e| match e {
            common::Event::Status(r) => Some(r),
            _ => None,
        })
        .expect("status event");
    assert_eq!(report.total_count, 1);
    assert_eq!(report.pending_count, 1);
    assert_eq!(report.last_sample_at, Some(at(0)));
}

#[test]
fn test_sync_now_runs_on_caller() {
    let f = fixture(prefs(100.0));
    assert_eq!(f.session.sync_now(), TickResult::Idle);

    f.session.on_location_update(&[fix(0, 5.0)]).unwrap();
    assert!(matches!(f.session.sync_now(), TickResult::Synced(_)));
    assert_eq!(f.session.status().unwrap().synced_count, 1);
}

// ============================================================================
// Login / Logout / Preferences
// ============================================================================

#[test]
fn test_login_stores_token_and_starts() {
    let f = fixture(prefs(100.0));
    f.tokens.clear();

    f.session.login("fresh".to_string()).unwrap();
    assert_eq!(f.tokens.token().as_deref(), Some("fresh"));
    assert!(f.session.timers_running());
}

#[test]
fn test_login_rearms_auth_prompt() {
    let f = fixture(prefs(100.0));
    f.tokens.clear();

    assert_eq!(f.session.sync_now(), TickResult::AuthExpired);
    assert_eq!(f.session.sync_now(), TickResult::AuthExpired);
    assert_eq!(f.listener.auth_expired_count(), 1);

    f.session.login("fresh".to_string()).unwrap();
    f.tokens.clear();
    assert_eq!(f.session.sync_now(), TickResult::AuthExpired);
    assert_eq!(f.listener.auth_expired_count(), 2);
}

#[test]
fn test_logout_keeps_samples_without_wipe() {
    let f = fixture(prefs(100.0));
    f.session.start().unwrap();
    f.session.on_location_update(&[fix(0, 5.0)]).unwrap();

    f.session.logout(false).unwrap();
    assert_eq!(f.tokens.token(), None);
    assert!(!f.session.timers_running());
    assert_eq!(f.location.calls().last(), Some(&LocationCall::Stop));
    assert_eq!(f.store.lock().unwrap().count().unwrap(), 1);
}

#[test]
fn test_logout_with_wipe_clears_store() {
    let f = fixture(prefs(100.0));
    f.session.start().unwrap();
    f.session.on_location_update(&[fix(0, 5.0)]).unwrap();
    f.session.sync_now();

    f.session.logout(true).unwrap();
    let store = f.store.lock().unwrap();
    assert_eq!(store.count().unwrap(), 0);
    assert!(store.last_outcome().unwrap().is_none());
}

#[test]
fn test_update_preferences_restarts_location() {
    let f = fixture(prefs(100.0));
    f.session.start().unwrap();

    f.session.update_preferences(prefs(10.0)).unwrap();
    assert_eq!(
        f.location.calls(),
        vec![
            LocationCall::Start(prefs(100.0)),
            LocationCall::Stop,
            LocationCall::Start(prefs(10.0)),
        ]
    );

    // New threshold applies to ingest immediately
    assert!(f.session.on_location_update(&[fix(0, 50.0)]).unwrap().is_none());
}

#[test]
fn test_invalid_preferences_are_rejected() {
    let f = fixture(prefs(100.0));
    assert!(f.session.update_preferences(prefs(-1.0)).is_err());
    assert!(f.location.calls().is_empty());
}

// ============================================================================
// Map Queries
// ============================================================================

#[test]
fn test_samples_for_period_uses_local_day_boundaries() {
    let f = fixture(prefs(100.0));
    let tz = FixedOffset::east_opt(2 * 3600).unwrap();
    // 2024-03-10 09:00 local
    let now = tz.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();

    let local = |d, h| {
        let t = tz.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap();
        hatrs::LocationFix::new(51.5, -0.12, 5.0, t.with_timezone(&chrono::Utc))
    };
    for sample in [
        local(10, 1),
        local(10, 0),
        local(9, 23),
        local(9, 0),
        local(5, 12),
        local(1, 12),
    ] {
        f.store.lock().unwrap().insert(&sample).unwrap();
    }

    // Local midnight counts as today only
    let today = f.session.samples_for_period_at(TimePeriod::Today, &now).unwrap();
    assert_eq!(today.len(), 2);

    let yesterday = f
        .session
        .samples_for_period_at(TimePeriod::Yesterday, &now)
        .unwrap();
    assert_eq!(yesterday.len(), 2);

    let week = f
        .session
        .samples_for_period_at(TimePeriod::LastWeek, &now)
        .unwrap();
    assert_eq!(week.len(), 5);
}
