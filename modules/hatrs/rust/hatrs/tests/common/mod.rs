//! Fake collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hatrs::{
    HatError, LocationFix, LocationPreferences, LocationSource, LocationUploader, Scheduler,
    StatusReport, SyncBlock, SyncListener, Task, TaskHandle, UploadResponse,
};

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn fix(secs: i64, accuracy: f64) -> LocationFix {
    LocationFix::new(51.5, -0.12, accuracy, at(secs))
}

// ============================================================================
// Uploader
// ============================================================================

/// Replays queued results; succeeds once the queue is empty.
#[derive(Default)]
pub struct FakeUploader {
    results: Mutex<VecDeque<hatrs::Result<UploadResponse>>>,
    uploads: Mutex<Vec<Vec<i64>>>,
    tokens_seen: Mutex<Vec<String>>,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: hatrs::Result<UploadResponse>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn fail_with(&self, message: &str) {
        self.push(Err(HatError::upload(message, None)));
    }

    /// Ids of every block handed to the uploader, in order.
    pub fn uploads(&self) -> Vec<Vec<i64>> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }
}

impl LocationUploader for FakeUploader {
    fn upload(&self, token: &str, block: &SyncBlock) -> hatrs::Result<UploadResponse> {
        self.uploads.lock().unwrap().push(block.ids());
        self.tokens_seen.lock().unwrap().push(token.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(UploadResponse::default()))
    }
}

// ============================================================================
// Listener
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CountChanged(u64),
    Feedback(bool, String),
    Status(StatusReport),
    AuthExpired,
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_changes(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::CountChanged(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn feedback(&self) -> Vec<(bool, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Feedback(ok, msg) => Some((ok, msg)),
                _ => None,
            })
            .collect()
    }

    pub fn auth_expired_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == Event::AuthExpired)
            .count()
    }
}

impl SyncListener for RecordingListener {
    fn on_count_changed(&self, count: u64) {
        self.events.lock().unwrap().push(Event::CountChanged(count));
    }

    fn on_sync_feedback(&self, success: bool, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Feedback(success, message.to_string()));
    }

    fn on_status(&self, report: &StatusReport) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Status(report.clone()));
    }

    fn on_auth_expired(&self) {
        self.events.lock().unwrap().push(Event::AuthExpired);
    }
}

// ============================================================================
// Location Source
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LocationCall {
    Start(LocationPreferences),
    Stop,
}

#[derive(Default)]
pub struct FakeLocationSource {
    calls: Mutex<Vec<LocationCall>>,
}

impl FakeLocationSource {
    pub fn calls(&self) -> Vec<LocationCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl LocationSource for FakeLocationSource {
    fn start(&self, preferences: &LocationPreferences) {
        self.calls
            .lock()
            .unwrap()
            .push(LocationCall::Start(*preferences));
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push(LocationCall::Stop);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

struct ScheduledTask {
    name: String,
    interval: Duration,
    task: Task,
    cancelled: Arc<AtomicBool>,
}

/// Records scheduled tasks; tests fire them by name.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl ManualScheduler {
    /// Run every live task with this name. Returns how many ran.
    pub fn fire(&self, name: &str) -> usize {
        let live: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.name == name && !t.cancelled.load(Ordering::Acquire))
            .map(|t| Arc::clone(&t.task))
            .collect();
        for task in &live {
            task();
        }
        live.len()
    }

    pub fn live_tasks(&self) -> Vec<(String, Duration)> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::Acquire))
            .map(|t| (t.name.clone(), t.interval))
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        name: &str,
        interval: Duration,
        task: Task,
    ) -> hatrs::Result<TaskHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.tasks.lock().unwrap().push(ScheduledTask {
            name: name.to_string(),
            interval,
            task,
            cancelled: Arc::clone(&cancelled),
        });
        Ok(TaskHandle::new(name, cancelled))
    }
}
