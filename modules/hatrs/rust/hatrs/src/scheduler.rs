//! Fixed-interval repeating tasks with cancellable handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use hatsync::HatError;
use log::{debug, info};

/// Work run on every interval.
pub type Task = Arc<dyn Fn() + Send + Sync>;

/// Handle to a scheduled task. Dropping it cancels the task.
pub struct TaskHandle {
    name: String,
    cancelled: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
}

impl TaskHandle {
    /// Handle backed only by a cancellation flag.
    pub fn new(name: &str, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            cancelled,
            wake: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop future runs. A run already in progress completes.
    pub fn cancel(&mut self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("[Scheduler] Cancelled '{}'", self.name);
        }
        // Disconnecting the channel wakes a sleeping thread
        self.wake.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` now and then every `interval` until the handle is cancelled.
    fn schedule_repeating(
        &self,
        name: &str,
        interval: Duration,
        task: Task,
    ) -> hatsync::Result<TaskHandle>;
}

/// One named OS thread per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule_repeating(
        &self,
        name: &str,
        interval: Duration,
        task: Task,
    ) -> hatsync::Result<TaskHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<()>();

        let flag = Arc::clone(&cancelled);
        let thread_name = name.to_string();
        thread::Builder::new()
            .name(format!("hatrs-{}", name))
            .spawn(move || {
                info!("[Scheduler] '{}' started, every {:?}", thread_name, interval);
                loop {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    task();
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("[Scheduler] '{}' stopped", thread_name);
            })
            .map_err(|e| HatError::config(format!("failed to spawn '{}': {}", name, e)))?;

        Ok(TaskHandle {
            name: name.to_string(),
            cancelled,
            wake: Some(tx),
        })
    }
}
