//! Live call session state.
//!
//! A [`CallSession`] is exclusively owned by the turn orchestration loop for
//! the duration of one call: turns are processed sequentially, so the struct
//! needs no internal locking. The shared pieces — the guidance slot, the
//! analysis in-flight flag, and the cancellation token — are `Arc`ed handles
//! that detached analysis tasks clone out of the session.
//!
//! When the call ends, the session is deregistered (cancelling any in-flight
//! analysis) and dropped after post-call memory extraction has been
//! triggered; a late analysis result has nowhere to land and is discarded.

use crate::config::LarkConfig;
use crate::guidance::GuidanceSlot;
use crate::phase::{advance, CallPhase, PhaseTrigger};
use crate::signals::GoodbyeGate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A reminder scheduled for delivery during a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Stable reminder id.
    pub id: String,
    /// What to remind the subject about.
    pub label: String,
}

/// One completed utterance/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnExchange {
    /// What the subject said.
    pub user_text: String,
    /// What the agent answered.
    pub assistant_text: String,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Goodbye finalized past its grace window.
    Goodbye,
    /// A strong safety signal escalated the call.
    SafetyEscalation,
    /// The hard time budget expired.
    HardTimeBudget,
    /// The transport dropped mid-call.
    TransportDropped,
}

/// State for one active call.
pub struct CallSession {
    /// Unique session id.
    pub session_id: String,
    /// The subject being called.
    pub subject_id: String,
    /// Wall-clock start (epoch seconds), for records and extraction.
    pub started_at_epoch: u64,
    /// Monotonic start, for time-budget checks.
    started_at: Instant,
    /// Current call phase.
    pub phase: CallPhase,
    /// Turns prepared so far.
    pub turn_count: u32,
    /// Reminders not yet delivered.
    pub pending_reminders: Vec<Reminder>,
    /// Reminders already worked into a response.
    pub delivered_reminder_ids: Vec<String>,
    /// Completed exchanges, oldest first.
    pub turns: Vec<TurnExchange>,
    /// Goodbye grace gate.
    pub goodbye: GoodbyeGate,
    /// Set once the session is marked for close.
    pub close_reason: Option<CloseReason>,

    guidance_slot: Arc<GuidanceSlot>,
    analysis_in_flight: Arc<AtomicBool>,
    analysis_seq: u64,
    cancel: CancellationToken,
}

impl CallSession {
    /// Start a new session for `subject_id` in the opening phase.
    #[must_use]
    pub fn new(subject_id: &str, config: &LarkConfig) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.to_owned(),
            started_at_epoch: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            started_at: Instant::now(),
            phase: CallPhase::Opening,
            turn_count: 0,
            pending_reminders: Vec::new(),
            delivered_reminder_ids: Vec::new(),
            turns: Vec::new(),
            goodbye: GoodbyeGate::new(&config.goodbye),
            close_reason: None,
            guidance_slot: Arc::new(GuidanceSlot::new()),
            analysis_in_flight: Arc::new(AtomicBool::new(false)),
            analysis_seq: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the monotonic start time (resumed accounting, tests).
    #[must_use]
    pub fn with_started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Attach the reminders due for this call.
    #[must_use]
    pub fn with_reminders(mut self, reminders: Vec<Reminder>) -> Self {
        self.pending_reminders = reminders;
        self
    }

    /// Time since the call started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Shared handle to this session's guidance slot.
    #[must_use]
    pub fn guidance_slot(&self) -> Arc<GuidanceSlot> {
        Arc::clone(&self.guidance_slot)
    }

    /// Shared handle to the analysis in-flight flag.
    #[must_use]
    pub fn analysis_in_flight(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.analysis_in_flight)
    }

    /// Cancellation token tied to this session's lifetime.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next dispatch sequence number for a background analysis.
    pub fn next_analysis_seq(&mut self) -> u64 {
        self.analysis_seq += 1;
        self.analysis_seq
    }

    /// Try to advance the phase; backward requests are ignored.
    ///
    /// Returns `true` if a transition happened.
    pub fn advance_phase(&mut self, target: CallPhase, trigger: PhaseTrigger) -> bool {
        let (phase, moved) = advance(self.phase, target, trigger);
        self.phase = phase;
        moved
    }

    /// Mark the session for graceful close.
    ///
    /// Forces the phase to closing, records the first close reason, and
    /// cancels any in-flight background analysis.
    pub fn mark_closed(&mut self, reason: CloseReason) {
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
        self.phase = CallPhase::Closing;
        self.cancel.cancel();
    }

    /// Returns `true` once the session has been marked for close.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_reason.is_some()
    }

    /// Record a completed exchange.
    pub fn record_exchange(&mut self, user_text: String, assistant_text: String) {
        self.turns.push(TurnExchange {
            user_text,
            assistant_text,
        });
    }

    /// Move a reminder from pending to delivered, if the phase permits.
    ///
    /// Returns the reminder for inclusion in the response context, or `None`
    /// if it is unknown, already delivered, or blocked by the current phase.
    pub fn deliver_reminder(&mut self, reminder_id: &str) -> Option<Reminder> {
        if !self.phase.allows_reminder_delivery() {
            return None;
        }
        let index = self
            .pending_reminders
            .iter()
            .position(|r| r.id == reminder_id)?;
        let reminder = self.pending_reminders.remove(index);
        self.delivered_reminder_ids.push(reminder.id.clone());
        Some(reminder)
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("session_id", &self.session_id)
            .field("subject_id", &self.subject_id)
            .field("phase", &self.phase)
            .field("turn_count", &self.turn_count)
            .field("close_reason", &self.close_reason)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide registry of active sessions.
///
/// Backs the status surface's active-session count and owns each session's
/// cancellation token so that deregistering (or dropping the registry) aborts
/// any in-flight background work for that session.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active session.
    pub fn register(&self, session: &CallSession) {
        self.lock()
            .insert(session.session_id.clone(), session.cancel_token());
    }

    /// Deregister a session, cancelling its in-flight work.
    pub fn deregister(&self, session_id: &str) {
        if let Some(token) = self.lock().remove(session_id) {
            token.cancel();
        }
    }

    /// Number of currently active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
