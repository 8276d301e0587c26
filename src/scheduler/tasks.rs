//! Outbound call task definitions.
//!
//! Defines the [`OutboundCall`] task type and its retry bookkeeping. Tasks
//! live outside any live session: the scheduler places calls, and a
//! connected call is handed to the turn orchestrator as a fresh session.

use lark_guard::Backoff;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Delivery state of an outbound call task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallTaskStatus {
    /// Waiting for its (next) attempt time.
    Pending,
    /// A call connected; the task is done.
    Completed,
    /// Every attempt failed; given up.
    Abandoned,
}

/// Outcome of one placement attempt, reported by the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAttemptResult {
    /// The call connected and a session ran.
    Connected,
    /// The attempt failed (no answer, line busy, transport error).
    Failed(String),
}

/// A scheduled outbound call with bounded retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundCall {
    /// Unique task id.
    pub id: String,
    /// Subject to call.
    pub subject_id: String,
    /// Originally requested call time (epoch seconds).
    pub scheduled_at: u64,
    /// Attempts made so far.
    pub attempts: u32,
    /// Attempt ceiling before the task is abandoned.
    pub max_attempts: u32,
    /// When the next attempt is due (epoch seconds).
    pub next_attempt_at: u64,
    /// Current delivery state.
    pub status: CallTaskStatus,
    /// When the task was created (epoch seconds).
    pub created_at: u64,
}

impl OutboundCall {
    /// Create a pending call task.
    #[must_use]
    pub fn new(subject_id: impl Into<String>, scheduled_at: u64, max_attempts: u32) -> Self {
        Self {
            id: format!("call-{}", uuid::Uuid::new_v4()),
            subject_id: subject_id.into(),
            scheduled_at,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            next_attempt_at: scheduled_at,
            status: CallTaskStatus::Pending,
            created_at: now_epoch_secs(),
        }
    }

    /// Returns `true` if the task is pending and its attempt time has come.
    #[must_use]
    pub fn is_due(&self, now: u64) -> bool {
        self.status == CallTaskStatus::Pending && now >= self.next_attempt_at
    }

    /// Record a failed attempt.
    ///
    /// Reschedules with exponential backoff, or abandons the task once the
    /// attempt ceiling is reached.
    pub fn record_failure(&mut self, now: u64, backoff: &Backoff) {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.status = CallTaskStatus::Abandoned;
            return;
        }
        let delay = backoff.jittered_delay(self.attempts - 1);
        self.next_attempt_at = now.saturating_add(delay.as_secs());
    }

    /// Record a connected call.
    pub fn record_success(&mut self) {
        self.status = CallTaskStatus::Completed;
    }
}

impl std::fmt::Display for OutboundCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let when = chrono::DateTime::from_timestamp(self.scheduled_at as i64, 0)
            .map_or_else(|| self.scheduled_at.to_string(), |t| t.to_rfc3339());
        write!(
            f,
            "call {} to {} at {when} ({:?}, attempt {}/{})",
            self.id, self.subject_id, self.status, self.attempts, self.max_attempts
        )
    }
}

/// Returns current UTC seconds since epoch.
pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn no_jitter_backoff() -> Backoff {
        Backoff {
            base: Duration::from_secs(30),
            factor: 2,
            max: Duration::from_secs(1800),
            jitter: 0.0,
        }
    }

    #[test]
    fn new_task_is_due_at_scheduled_time() {
        let task = OutboundCall::new("alice", 1_000, 4);
        assert!(!task.is_due(999));
        assert!(task.is_due(1_000));
        assert!(task.is_due(2_000));
    }

    #[test]
    fn failure_reschedules_with_backoff() {
        let mut task = OutboundCall::new("alice", 1_000, 4);
        task.record_failure(1_000, &no_jitter_backoff());

        assert_eq!(task.status, CallTaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.next_attempt_at, 1_030);
        assert!(!task.is_due(1_010));
        assert!(task.is_due(1_030));
    }

    #[test]
    fn backoff_grows_per_attempt() {
        let mut task = OutboundCall::new("alice", 1_000, 10);
        let backoff = no_jitter_backoff();

        task.record_failure(1_000, &backoff);
        assert_eq!(task.next_attempt_at, 1_030); // 30s
        task.record_failure(1_030, &backoff);
        assert_eq!(task.next_attempt_at, 1_090); // +60s
        task.record_failure(1_090, &backoff);
        assert_eq!(task.next_attempt_at, 1_210); // +120s
    }

    #[test]
    fn abandoned_after_max_attempts() {
        let mut task = OutboundCall::new("alice", 1_000, 2);
        let backoff = no_jitter_backoff();

        task.record_failure(1_000, &backoff);
        assert_eq!(task.status, CallTaskStatus::Pending);
        task.record_failure(1_030, &backoff);
        assert_eq!(task.status, CallTaskStatus::Abandoned);
        assert!(!task.is_due(10_000));
    }

    #[test]
    fn success_completes_task() {
        let mut task = OutboundCall::new("alice", 1_000, 4);
        task.record_success();
        assert_eq!(task.status, CallTaskStatus::Completed);
        assert!(!task.is_due(10_000));
    }

    #[test]
    fn serde_round_trip() {
        let task = OutboundCall::new("alice", 1_000, 4);
        let json = serde_json::to_string(&task).expect("serialize");
        let parsed: OutboundCall = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.status, CallTaskStatus::Pending);
    }
}
