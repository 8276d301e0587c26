//! Outbound call scheduler loop.
//!
//! A background tokio task periodically checks for due call tasks and hands
//! them to a [`CallLauncher`]. Task definitions and retry state are
//! persisted as JSON at the configured state path so a restart resumes
//! where it left off.
//!
//! Attempts run sequentially within a tick, and a subject is attempted at
//! most once per tick, so a retry can never overlap a still-in-progress
//! prior attempt for the same subject.

use crate::config::SchedulerConfig;
use crate::error::{CallError, Result};
use crate::scheduler::tasks::{now_epoch_secs, CallAttemptResult, CallTaskStatus, OutboundCall};
use async_trait::async_trait;
use lark_guard::Backoff;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Places one outbound call and runs it to completion.
#[async_trait]
pub trait CallLauncher: Send + Sync {
    /// Attempt the call. Returns once the call has ended or failed.
    async fn launch(&self, call: &OutboundCall) -> CallAttemptResult;
}

/// Public snapshot used by status/tooling surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Persisted tasks, including completed and abandoned ones.
    pub tasks: Vec<OutboundCall>,
}

/// Persisted scheduler state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchedulerState {
    /// Schema version.
    #[serde(default = "default_state_version")]
    version: u8,
    /// Persisted task definitions and retry state.
    #[serde(default)]
    tasks: Vec<OutboundCall>,
}

fn default_state_version() -> u8 {
    1
}

/// Background scheduler for outbound calls.
pub struct CallScheduler {
    tasks: Vec<OutboundCall>,
    state_path: Option<PathBuf>,
    launcher: Arc<dyn CallLauncher>,
    backoff: Backoff,
    tick_interval: Duration,
    max_attempts: u32,
}

impl CallScheduler {
    /// Create a scheduler; loads persisted state if a state path is set.
    pub fn new(config: &SchedulerConfig, launcher: Arc<dyn CallLauncher>) -> Self {
        let mut scheduler = Self {
            tasks: Vec::new(),
            state_path: config.state_path.clone(),
            launcher,
            backoff: Backoff {
                base: Duration::from_secs(config.backoff_base_secs),
                factor: 2,
                max: Duration::from_secs(config.backoff_max_secs),
                jitter: 0.1,
            },
            tick_interval: Duration::from_secs(config.tick_secs.max(1)),
            max_attempts: config.max_attempts,
        };
        scheduler.load_state();
        scheduler
    }

    /// Schedule an outbound call. Returns the task id.
    pub fn schedule_call(&mut self, subject_id: &str, scheduled_at: u64) -> String {
        let task = OutboundCall::new(subject_id, scheduled_at, self.max_attempts);
        let id = task.id.clone();
        info!(%id, subject_id, scheduled_at, "outbound call scheduled");
        self.tasks.push(task);
        self.save_state();
        id
    }

    /// Snapshot of all tasks for status surfaces.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            tasks: self.tasks.clone(),
        }
    }

    /// Run one scheduler pass: attempt every due task, at most one attempt
    /// per subject per pass.
    pub async fn tick(&mut self) {
        let now = now_epoch_secs();
        let due: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_due(now))
            .map(|(i, _)| i)
            .collect();

        if due.is_empty() {
            return;
        }

        let mut attempted_subjects: HashSet<String> = HashSet::new();
        let mut dirty = false;

        for index in due {
            let subject = self.tasks[index].subject_id.clone();
            if !attempted_subjects.insert(subject.clone()) {
                debug!(subject_id = %subject, "subject already attempted this pass, deferring");
                continue;
            }

            let result = self.launcher.launch(&self.tasks[index]).await;
            let task = &mut self.tasks[index];
            let now = now_epoch_secs();
            match result {
                CallAttemptResult::Connected => {
                    info!(id = %task.id, subject_id = %task.subject_id, "outbound call connected");
                    task.record_success();
                }
                CallAttemptResult::Failed(reason) => {
                    task.record_failure(now, &self.backoff);
                    match task.status {
                        CallTaskStatus::Abandoned => {
                            warn!(
                                id = %task.id,
                                subject_id = %task.subject_id,
                                reason,
                                "outbound call abandoned after {} attempts",
                                task.attempts
                            );
                        }
                        _ => {
                            debug!(
                                id = %task.id,
                                reason,
                                next_attempt_at = task.next_attempt_at,
                                "outbound call failed, retry scheduled"
                            );
                        }
                    }
                }
            }
            dirty = true;
        }

        if dirty {
            self.save_state();
        }
    }

    /// Spawn the background loop. Stops when `cancel` fires.
    pub fn spawn(mut self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(tick_secs = self.tick_interval.as_secs(), "call scheduler running");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("call scheduler stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // State persistence
    // -----------------------------------------------------------------------

    fn load_state(&mut self) {
        let Some(path) = &self.state_path else {
            return;
        };
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<SchedulerState>(&content) {
                Ok(state) => {
                    debug!(tasks = state.tasks.len(), "scheduler state loaded");
                    self.tasks = state.tasks;
                }
                Err(e) => error!(error = %e, "scheduler state unreadable, starting fresh"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(error = %e, "scheduler state read failed, starting fresh"),
        }
    }

    fn save_state(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        if let Err(e) = self.write_state(path) {
            error!(error = %e, "scheduler state save failed");
        }
    }

    fn write_state(&self, path: &PathBuf) -> Result<()> {
        let state = SchedulerState {
            version: default_state_version(),
            tasks: self.tasks.clone(),
        };
        let content = serde_json::to_string_pretty(&state)
            .map_err(|e| CallError::Scheduler(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Launcher that fails the first `fail_first` attempts, then connects.
    struct FlakyLauncher {
        calls: AtomicUsize,
        fail_first: usize,
        subjects_seen: Mutex<Vec<String>>,
    }

    impl FlakyLauncher {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
                subjects_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CallLauncher for FlakyLauncher {
        async fn launch(&self, call: &OutboundCall) -> CallAttemptResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.subjects_seen
                .lock()
                .expect("lock")
                .push(call.subject_id.clone());
            if n < self.fail_first {
                CallAttemptResult::Failed("no answer".to_owned())
            } else {
                CallAttemptResult::Connected
            }
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            tick_secs: 1,
            max_attempts: 3,
            backoff_base_secs: 60,
            backoff_max_secs: 600,
            state_path: None,
        }
    }

    #[tokio::test]
    async fn tick_launches_due_calls() {
        let launcher = Arc::new(FlakyLauncher::new(0));
        let mut scheduler = CallScheduler::new(&config(), Arc::clone(&launcher) as _);
        scheduler.schedule_call("alice", now_epoch_secs());

        scheduler.tick().await;

        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.tasks[0].status, CallTaskStatus::Completed);
    }

    #[tokio::test]
    async fn future_calls_are_not_launched() {
        let launcher = Arc::new(FlakyLauncher::new(0));
        let mut scheduler = CallScheduler::new(&config(), Arc::clone(&launcher) as _);
        scheduler.schedule_call("alice", now_epoch_secs() + 3600);

        scheduler.tick().await;

        assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.tasks[0].status, CallTaskStatus::Pending);
    }

    #[tokio::test]
    async fn failed_call_is_rescheduled_with_backoff() {
        let launcher = Arc::new(FlakyLauncher::new(10));
        let mut scheduler = CallScheduler::new(&config(), Arc::clone(&launcher) as _);
        let before = now_epoch_secs();
        scheduler.schedule_call("alice", before);

        scheduler.tick().await;

        let task = &scheduler.tasks[0];
        assert_eq!(task.status, CallTaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert!(task.next_attempt_at >= before + 60, "backoff applied");

        // Not due yet — a second tick must not re-attempt.
        scheduler.tick().await;
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_attempt_per_subject_per_pass() {
        let launcher = Arc::new(FlakyLauncher::new(0));
        let mut scheduler = CallScheduler::new(&config(), Arc::clone(&launcher) as _);
        let now = now_epoch_secs();
        scheduler.schedule_call("alice", now);
        scheduler.schedule_call("alice", now);
        scheduler.schedule_call("bob", now);

        scheduler.tick().await;

        let seen = launcher.subjects_seen.lock().expect("lock").clone();
        assert_eq!(seen.len(), 2, "duplicate alice deferred");
        assert!(seen.contains(&"alice".to_owned()));
        assert!(seen.contains(&"bob".to_owned()));
    }

    #[tokio::test]
    async fn abandons_after_bounded_retries() {
        let launcher = Arc::new(FlakyLauncher::new(usize::MAX));
        let mut cfg = config();
        cfg.backoff_base_secs = 0;
        cfg.backoff_max_secs = 0;
        let mut scheduler = CallScheduler::new(&cfg, Arc::clone(&launcher) as _);
        scheduler.schedule_call("alice", now_epoch_secs());

        // Zero backoff keeps the task immediately due until abandoned.
        for _ in 0..5 {
            scheduler.tick().await;
        }

        assert_eq!(scheduler.tasks[0].status, CallTaskStatus::Abandoned);
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 3, "max_attempts bound");
    }

    #[tokio::test]
    async fn state_round_trips_through_disk() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let mut cfg = config();
        cfg.state_path = Some(dir.path().join("scheduler.json"));

        let launcher = Arc::new(FlakyLauncher::new(0));
        let mut scheduler = CallScheduler::new(&cfg, Arc::clone(&launcher) as _);
        let id = scheduler.schedule_call("alice", now_epoch_secs() + 3600);

        // A fresh scheduler from the same path sees the task.
        let restored = CallScheduler::new(&cfg, Arc::clone(&launcher) as _);
        let snapshot = restored.snapshot();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].id, id);
    }
}
