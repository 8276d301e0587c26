//! Turn orchestration.
//!
//! [`TurnOrchestrator::prepare_turn`] is the per-utterance hot path. It runs
//! the synchronous signal pass, folds in the *previous* turn's cached
//! guidance, queries the memory store, and returns a [`ResponseContext`]
//! without ever awaiting the guidance analyzer — analysis for the current
//! turn is dispatched as a detached task whose result feeds the *next* turn.
//!
//! Degradation rules, in order of preference: stale guidance over no
//! guidance, critical-only memories over no memories, and a well-formed
//! farewell over everything — no analyzer or store failure may stall the
//! live call.

use crate::config::LarkConfig;
use crate::context::ResponseContext;
use crate::error::Result;
use crate::guidance::{GuidanceAnalyzer, GuidanceRequest, ReminderDirective};
use crate::memory::{Embedder, MemoryContext, MemoryStore};
use crate::phase::{CallPhase, PhaseTrigger};
use crate::session::{CallSession, CloseReason, TurnExchange};
use crate::signals::{classify, GoodbyeDecision};
use lark_guard::{guarded_call, GuardHandle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Guard service name for embedding generation.
pub const SERVICE_EMBEDDING: &str = "embedding";
/// Guard service name for guidance analysis.
pub const SERVICE_GUIDANCE: &str = "guidance";

/// Coordinates the turn hot path for all sessions.
pub struct TurnOrchestrator {
    config: LarkConfig,
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    analyzer: Arc<dyn GuidanceAnalyzer>,
    guard: GuardHandle,
}

impl TurnOrchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        config: LarkConfig,
        store: Arc<MemoryStore>,
        embedder: Arc<dyn Embedder>,
        analyzer: Arc<dyn GuidanceAnalyzer>,
        guard: GuardHandle,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            analyzer,
            guard,
        }
    }

    /// Prepare the response context for one utterance.
    ///
    /// Must stay cheap: the only network touches are the guarded embedding
    /// call feeding the memory similarity query. Guidance analysis is
    /// dispatched fire-and-forget at the end.
    pub async fn prepare_turn(
        &self,
        session: &mut CallSession,
        utterance: &str,
    ) -> ResponseContext {
        let turn_index = session.turn_count;

        // Time-budget overrides run first, regardless of anything the
        // analyzer recommended: past the hard budget the call closes on
        // this very step, past the soft budget it winds down.
        let elapsed = session.elapsed();
        if elapsed >= Duration::from_secs(self.config.call.hard_limit_secs) {
            session.mark_closed(CloseReason::HardTimeBudget);
        } else if elapsed >= Duration::from_secs(self.config.call.soft_limit_secs) {
            session.advance_phase(CallPhase::WindingDown, PhaseTrigger::TimeBudget);
        }

        // Synchronous signal pass.
        let signals = classify(utterance, session.phase);

        match session.goodbye.observe(utterance, &signals, Instant::now()) {
            GoodbyeDecision::Finalized => session.mark_closed(CloseReason::Goodbye),
            GoodbyeDecision::Armed => {
                debug!(session_id = %session.session_id, "goodbye pending, grace window open");
            }
            GoodbyeDecision::Retracted => {
                debug!(session_id = %session.session_id, "pending goodbye retracted");
            }
            GoodbyeDecision::None => {}
        }

        if signals.requires_escalation() {
            warn!(session_id = %session.session_id, "safety signal, escalating");
            session.mark_closed(CloseReason::SafetyEscalation);
        }

        // Terminal: skip retrieval and analysis, return a close context.
        if session.is_closed() {
            session.turn_count = turn_index + 1;
            return ResponseContext {
                session_id: session.session_id.clone(),
                turn_index,
                phase: session.phase,
                signals,
                guidance: None,
                memories: MemoryContext::default(),
                reminder: None,
                close_directive: session.close_reason,
            };
        }

        // Previous turn's guidance, if its analysis has landed. Always one
        // turn stale by construction; absent on the first turn.
        let guidance = session.guidance_slot().take();

        let mut reminder = None;
        if let Some(guidance) = &guidance {
            if let Some(phase) = guidance.phase {
                session.advance_phase(phase, PhaseTrigger::Guidance);
            }
            if let Some(ReminderDirective::Deliver { reminder_id }) = &guidance.reminder_directive
            {
                reminder = session.deliver_reminder(reminder_id);
            }
        }

        let memories = self.memory_context(session, utterance).await;

        let context = ResponseContext {
            session_id: session.session_id.clone(),
            turn_index,
            phase: session.phase,
            signals,
            guidance,
            memories,
            reminder,
            close_directive: None,
        };

        // Fire-and-forget analysis for this turn; its result surfaces when
        // preparing the next one.
        self.dispatch_analysis(session, utterance, turn_index, &context);

        session.turn_count = turn_index + 1;
        context
    }

    /// Explicit phase directive from the generative service's tool call.
    pub fn apply_directive(&self, session: &mut CallSession, target: CallPhase) -> bool {
        session.advance_phase(target, PhaseTrigger::Directive)
    }

    /// Embed the utterance and build the tiered memory context.
    ///
    /// Embedding failure (timeout, open circuit, bad response) degrades to
    /// the critical-only context; store failure degrades to no memories.
    /// Neither reaches the caller as an error.
    async fn memory_context(&self, session: &CallSession, utterance: &str) -> MemoryContext {
        let timeout = Duration::from_secs(self.config.embedding.timeout_secs);
        match guarded_call(
            &self.guard,
            SERVICE_EMBEDDING,
            timeout,
            self.embedder.embed(utterance),
        )
        .await
        {
            Ok(embedding) => match self.store.build_context(
                &session.subject_id,
                &embedding,
                session.turn_count,
            ) {
                Ok(context) => context,
                Err(e) => {
                    warn!(error = %e, "memory retrieval failed, continuing without memories");
                    MemoryContext::default()
                }
            },
            Err(e) => {
                debug!(error = %e, "embedding degraded, falling back to critical memories");
                self.store
                    .critical_context(&session.subject_id)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "critical fallback failed, continuing without memories");
                        MemoryContext::default()
                    })
            }
        }
    }

    /// Spawn the detached guidance analysis for this turn.
    ///
    /// At most one analysis per session is in flight: if the previous one
    /// has not resolved, this turn's is skipped outright (never queued).
    /// The task is abandoned via the session's cancellation token; an
    /// abandoned or failed analysis leaves the previous cached value alone.
    fn dispatch_analysis(
        &self,
        session: &mut CallSession,
        utterance: &str,
        turn_index: u32,
        context: &ResponseContext,
    ) {
        let in_flight = session.analysis_in_flight();
        if in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(
                session_id = %session.session_id,
                turn_index, "analysis still in flight, skipping this turn's"
            );
            return;
        }

        let seq = session.next_analysis_seq();
        let slot = session.guidance_slot();
        let cancel = session.cancel_token();
        let analyzer = Arc::clone(&self.analyzer);
        let guard = self.guard.clone();
        let timeout = Duration::from_secs(self.config.guidance.timeout_secs);

        let mut turn_history = session.turns.clone();
        turn_history.push(TurnExchange {
            user_text: utterance.to_owned(),
            assistant_text: String::new(),
        });
        let request = GuidanceRequest {
            turn_history,
            subject_profile: subject_profile(context),
            pending_reminders: session.pending_reminders.clone(),
        };

        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = cancel.cancelled() => None,
                result = guarded_call(&guard, SERVICE_GUIDANCE, timeout, analyzer.analyze(request)) => {
                    Some(result)
                }
            };

            match outcome {
                Some(Ok(mut guidance)) => {
                    guidance.turn_index = turn_index;
                    slot.publish(seq, guidance);
                }
                Some(Err(e)) => {
                    debug!(error = %e, "guidance analysis failed, keeping previous guidance");
                }
                None => {
                    debug!("guidance analysis abandoned, session ended");
                }
            }

            in_flight.store(false, Ordering::SeqCst);
        });
    }
}

impl TurnOrchestrator {
    /// Store accessor for maintenance tooling and post-call extraction.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Validate that the orchestrator's store is reachable.
    pub fn health_check(&self) -> Result<()> {
        self.store.schema_version().map_err(Into::into).map(|_| ())
    }
}

/// Short subject profile for the analyzer, from the critical memory tier.
fn subject_profile(context: &ResponseContext) -> String {
    context
        .memories
        .critical
        .iter()
        .map(|h| h.record.content.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStoreConfig;
    use crate::error::CallError;
    use crate::guidance::{EmotionalTone, EngagementLevel, GuidanceResult, ModelHint};
    use crate::memory::types::{MemoryKind, MemorySource, NewMemory, EMBEDDING_DIM};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::Arc;

    struct FixedEmbedder {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CallError::Embedding("embedder down".to_owned()));
            }
            let mut v = vec![0.0; EMBEDDING_DIM];
            v[0] = 1.0;
            Ok(v)
        }
    }

    struct ScriptedAnalyzer {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl GuidanceAnalyzer for ScriptedAnalyzer {
        async fn analyze(&self, request: GuidanceRequest) -> Result<GuidanceResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(GuidanceResult {
                turn_index: request.turn_history.len() as u32,
                phase: None,
                engagement: EngagementLevel::Medium,
                tone: EmotionalTone::Gentle,
                next_topic_hint: Some("the garden".to_owned()),
                reminder_directive: None,
                model_hint: ModelHint::Fast,
            })
        }
    }

    struct Harness {
        orchestrator: TurnOrchestrator,
        analyzer: Arc<ScriptedAnalyzer>,
        embedder: Arc<FixedEmbedder>,
        config: LarkConfig,
    }

    fn harness(analyzer_delay: Duration) -> Harness {
        harness_with(LarkConfig::default(), analyzer_delay)
    }

    fn harness_with(config: LarkConfig, analyzer_delay: Duration) -> Harness {
        let store = Arc::new(
            MemoryStore::open_in_memory(&MemoryStoreConfig::default()).expect("store"),
        );
        let embedder = Arc::new(FixedEmbedder {
            fail: AtomicBool::new(false),
        });
        let analyzer = Arc::new(ScriptedAnalyzer {
            calls: AtomicU32::new(0),
            delay: analyzer_delay,
        });
        let orchestrator = TurnOrchestrator::new(
            config.clone(),
            store,
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            Arc::clone(&analyzer) as Arc<dyn GuidanceAnalyzer>,
            GuardHandle::default(),
        );
        Harness {
            orchestrator,
            analyzer,
            embedder,
            config,
        }
    }

    fn seed_concern(store: &MemoryStore) {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[5] = 1.0;
        store
            .store(NewMemory {
                subject_id: "alice".to_owned(),
                kind: MemoryKind::Concern,
                content: "has been skipping meals".to_owned(),
                importance: 70.0,
                source: MemorySource::Extraction,
                embedding: v,
                metadata: None,
            })
            .expect("seed");
    }

    async fn wait_for_slot(session: &CallSession) {
        let slot = session.guidance_slot();
        tokio::time::timeout(Duration::from_secs(2), async move {
            while !slot.is_loaded() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("analysis should land");
    }

    #[tokio::test]
    async fn first_turn_has_no_guidance() {
        let h = harness(Duration::ZERO);
        let mut session = CallSession::new("alice", &h.config);

        let ctx = h.orchestrator.prepare_turn(&mut session, "hello dear").await;
        assert!(ctx.guidance.is_none(), "no prior turn, no guidance");
        assert_eq!(ctx.turn_index, 0);
        assert_eq!(session.turn_count, 1);
    }

    #[tokio::test]
    async fn guidance_lags_exactly_one_turn() {
        let h = harness(Duration::ZERO);
        let mut session = CallSession::new("alice", &h.config);

        let ctx0 = h.orchestrator.prepare_turn(&mut session, "hello").await;
        assert!(ctx0.guidance.is_none());

        wait_for_slot(&session).await;

        let ctx1 = h
            .orchestrator
            .prepare_turn(&mut session, "the garden is lovely")
            .await;
        let guidance = ctx1.guidance.expect("turn 0's analysis visible at turn 1");
        assert_eq!(guidance.turn_index, 0, "guidance stamped with source turn");
    }

    #[tokio::test]
    async fn slow_analysis_is_skipped_not_queued() {
        let h = harness(Duration::from_secs(3));
        let mut session = CallSession::new("alice", &h.config);

        let _ = h.orchestrator.prepare_turn(&mut session, "hello").await;
        // Second turn arrives while turn 0's analysis is still running.
        let _ = h.orchestrator.prepare_turn(&mut session, "still here").await;

        // Give the runtime a beat: no second analyze call may have started.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn safety_signal_short_circuits() {
        let h = harness(Duration::ZERO);
        let mut session = CallSession::new("alice", &h.config);

        let ctx = h
            .orchestrator
            .prepare_turn(&mut session, "I have chest pain, call 911")
            .await;

        assert_eq!(ctx.close_directive, Some(CloseReason::SafetyEscalation));
        assert_eq!(session.phase, CallPhase::Closing);
        // No analysis dispatched for a terminal turn.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hard_budget_forces_closing_next_step() {
        // Zero hard budget: the session is over-budget the moment it starts.
        let mut config = LarkConfig::default();
        config.call.soft_limit_secs = 0;
        config.call.hard_limit_secs = 0;
        let h = harness_with(config.clone(), Duration::ZERO);
        let mut session = CallSession::new("alice", &config);

        let ctx = h
            .orchestrator
            .prepare_turn(&mut session, "and another thing about the neighbours")
            .await;

        assert_eq!(session.phase, CallPhase::Closing);
        assert_eq!(ctx.close_directive, Some(CloseReason::HardTimeBudget));
    }

    #[tokio::test]
    async fn soft_budget_forces_winding_down() {
        // Zero soft budget with a roomy hard budget.
        let mut config = LarkConfig::default();
        config.call.soft_limit_secs = 0;
        config.call.hard_limit_secs = 3600;
        let h = harness_with(config.clone(), Duration::ZERO);
        let mut session = CallSession::new("alice", &config);

        let ctx = h
            .orchestrator
            .prepare_turn(&mut session, "tell me more about that")
            .await;

        assert_eq!(ctx.phase, CallPhase::WindingDown);
        assert!(ctx.close_directive.is_none(), "soft budget does not close");
    }

    #[tokio::test]
    async fn goodbye_retraction_keeps_call_alive() {
        let h = harness(Duration::ZERO);
        let mut session = CallSession::new("alice", &h.config);

        let _ = h.orchestrator.prepare_turn(&mut session, "well, gotta go").await;
        assert!(session.goodbye.is_pending());
        assert!(!session.is_closed());

        let ctx = h
            .orchestrator
            .prepare_turn(&mut session, "oh wait, I forgot to tell you about the plumber")
            .await;
        assert!(!session.goodbye.is_pending());
        assert!(!session.is_closed());
        assert!(ctx.close_directive.is_none());
    }

    #[tokio::test]
    async fn unretracted_goodbye_finalizes() {
        let h = harness(Duration::ZERO);
        let mut config = h.config.clone();
        config.goodbye.grace_secs = 0;
        let mut session = CallSession::new("alice", &config);

        let _ = h.orchestrator.prepare_turn(&mut session, "goodbye now").await;
        // With a zero grace window the next observation finalizes.
        let ctx = h.orchestrator.prepare_turn(&mut session, "bye").await;

        assert_eq!(ctx.close_directive, Some(CloseReason::Goodbye));
        assert_eq!(session.phase, CallPhase::Closing);
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_critical_memories() {
        let h = harness(Duration::ZERO);
        seed_concern(h.orchestrator.store());
        h.embedder.fail.store(true, Ordering::SeqCst);

        let mut session = CallSession::new("alice", &h.config);
        let ctx = h
            .orchestrator
            .prepare_turn(&mut session, "hello there")
            .await;

        assert_eq!(ctx.memories.critical.len(), 1);
        assert!(ctx.memories.contextual.is_empty());
        assert!(
            ctx.close_directive.is_none(),
            "degraded retrieval must not end the call"
        );
    }

    #[tokio::test]
    async fn directive_advances_phase() {
        let h = harness(Duration::ZERO);
        let mut session = CallSession::new("alice", &h.config);
        assert!(h.orchestrator.apply_directive(&mut session, CallPhase::Main));
        assert!(!h.orchestrator.apply_directive(&mut session, CallPhase::Opening));
        assert_eq!(session.phase, CallPhase::Main);
    }
}
