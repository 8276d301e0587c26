//! Asynchronous per-turn guidance.
//!
//! Guidance is advisory output (tone, pacing, next topic, reminder timing)
//! computed by an external analyzer from the full turn history. It is
//! deliberately slower than the response path: analysis for turn *N* runs as
//! a detached task and its result is injected when preparing turn *N+1*.
//! The trade is one turn of staleness for zero added response latency.
//!
//! The [`GuidanceSlot`] holds at most one pending result per session.
//! Writes carry the dispatch sequence of the analysis that produced them, so
//! out-of-order completions resolve latest-dispatched-wins rather than
//! last-arrived-wins.

use crate::config::GuidanceConfig;
use crate::error::{CallError, Result};
use crate::phase::CallPhase;
use crate::session::{Reminder, TurnExchange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// How engaged the subject sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

/// Emotional register the response should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTone {
    Neutral,
    Upbeat,
    Gentle,
    Concerned,
}

/// Which model size the next response generation should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHint {
    /// Small/fast model is sufficient.
    #[default]
    Fast,
    /// The conversation warrants the larger model.
    Deep,
}

/// What to do with a pending reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReminderDirective {
    /// Work this reminder into the next response.
    Deliver {
        /// Id of the reminder to deliver.
        reminder_id: String,
    },
    /// Hold all reminders for now (bad moment).
    Defer,
}

/// Structured advisory output for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceResult {
    /// The turn this guidance was computed from.
    pub turn_index: u32,
    /// Recommended call phase, if the analyzer wants a transition.
    #[serde(default)]
    pub phase: Option<CallPhase>,
    /// Detected engagement level.
    pub engagement: EngagementLevel,
    /// Recommended emotional register.
    pub tone: EmotionalTone,
    /// Suggested next topic, if any.
    #[serde(default)]
    pub next_topic_hint: Option<String>,
    /// Reminder handling directive, if any.
    #[serde(default)]
    pub reminder_directive: Option<ReminderDirective>,
    /// Model-size hint for the next generation.
    #[serde(default)]
    pub model_hint: ModelHint,
}

/// Request payload for the guidance analyzer endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GuidanceRequest {
    /// Full turn history so far.
    pub turn_history: Vec<TurnExchange>,
    /// Short profile of the subject (assembled from memory).
    pub subject_profile: String,
    /// Reminders not yet delivered this call.
    pub pending_reminders: Vec<Reminder>,
}

// ---------------------------------------------------------------------------
// Single-slot cache
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SlotState {
    result: Option<GuidanceResult>,
    dispatch_seq: u64,
}

/// Per-session single-slot guidance cache.
///
/// One writer (the detached analysis task) and one reader (the next turn's
/// orchestration step). A newer dispatch overwrites an unconsumed result;
/// a result from an older dispatch than the last accepted one is discarded.
#[derive(Debug, Default)]
pub struct GuidanceSlot {
    inner: Mutex<SlotState>,
}

impl GuidanceSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a result produced by dispatch number `seq`.
    ///
    /// Returns `false` (and drops the result) when a result from a later
    /// dispatch has already been accepted — latest-dispatched wins, results
    /// are never merged.
    pub fn publish(&self, seq: u64, result: GuidanceResult) -> bool {
        let mut state = self.lock();
        if seq < state.dispatch_seq {
            warn!(
                seq,
                current = state.dispatch_seq,
                "discarding stale guidance result"
            );
            return false;
        }
        state.dispatch_seq = seq;
        state.result = Some(result);
        true
    }

    /// Consume the cached result, leaving the slot empty.
    ///
    /// The dispatch watermark survives the take, so a stale result arriving
    /// afterwards still loses.
    pub fn take(&self) -> Option<GuidanceResult> {
        self.lock().result.take()
    }

    /// Returns `true` if a result is waiting.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.lock().result.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Produces structured guidance from a turn history.
///
/// Implementations must be idempotent and side-effect-free; the orchestrator
/// may skip, abandon, or repeat calls freely.
#[async_trait]
pub trait GuidanceAnalyzer: Send + Sync {
    /// Analyze the conversation so far.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Guidance`] when the analyzer is unreachable or
    /// its response is unusable. Callers treat any error as "keep the
    /// previous guidance".
    async fn analyze(&self, request: GuidanceRequest) -> Result<GuidanceResult>;
}

/// HTTP-backed [`GuidanceAnalyzer`].
pub struct HttpGuidanceAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGuidanceAnalyzer {
    /// Create an analyzer client for the configured endpoint.
    #[must_use]
    pub fn new(config: &GuidanceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
        }
    }
}

impl std::fmt::Debug for HttpGuidanceAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGuidanceAnalyzer")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GuidanceAnalyzer for HttpGuidanceAnalyzer {
    async fn analyze(&self, request: GuidanceRequest) -> Result<GuidanceResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallError::Guidance(format!("guidance request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CallError::Guidance(format!(
                "guidance endpoint returned {}",
                response.status()
            )));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| CallError::Guidance(format!("guidance body read failed: {e}")))?;

        parse_guidance_response(&raw)
            .ok_or_else(|| CallError::Guidance("malformed guidance response discarded".to_owned()))
    }
}

/// Parse an analyzer response, tolerating markdown fences and wrapper prose.
///
/// Returns `None` (after a `warn!`) on malformed input — the caller keeps
/// the previous cached guidance in that case.
#[must_use]
pub fn parse_guidance_response(raw: &str) -> Option<GuidanceResult> {
    let json_str = extract_json_block(raw);
    match serde_json::from_str::<GuidanceResult>(json_str) {
        Ok(result) => Some(result),
        Err(e) => {
            if !json_str.trim().is_empty() {
                warn!("guidance response parse failed: {e}");
            }
            None
        }
    }
}

/// Extract the JSON body from a potentially markdown-fenced response.
fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();

    // Check for ```json ... ``` fences.
    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    // Check for ``` ... ``` fences (no language tag).
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    // Try to find JSON object boundaries.
    if let Some(start) = trimmed.find('{')
        && let Some(end) = trimmed.rfind('}')
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guidance(turn_index: u32) -> GuidanceResult {
        GuidanceResult {
            turn_index,
            phase: None,
            engagement: EngagementLevel::Medium,
            tone: EmotionalTone::Neutral,
            next_topic_hint: None,
            reminder_directive: None,
            model_hint: ModelHint::Fast,
        }
    }

    #[test]
    fn slot_starts_empty() {
        let slot = GuidanceSlot::new();
        assert!(!slot.is_loaded());
        assert!(slot.take().is_none());
    }

    #[test]
    fn publish_then_take_consumes_once() {
        let slot = GuidanceSlot::new();
        assert!(slot.publish(1, guidance(0)));

        let first = slot.take();
        assert_eq!(first.map(|g| g.turn_index), Some(0));
        // Consumed exactly once.
        assert!(slot.take().is_none());
    }

    #[test]
    fn newer_dispatch_overwrites_unconsumed_result() {
        let slot = GuidanceSlot::new();
        slot.publish(1, guidance(0));
        slot.publish(2, guidance(1));

        let result = slot.take().expect("result present");
        assert_eq!(result.turn_index, 1, "latest dispatch wins, not merged");
    }

    #[test]
    fn stale_dispatch_loses_even_when_it_arrives_last() {
        let slot = GuidanceSlot::new();
        // Dispatch 2 resolves first...
        assert!(slot.publish(2, guidance(1)));
        // ...then dispatch 1 limps in late and must be discarded.
        assert!(!slot.publish(1, guidance(0)));

        let result = slot.take().expect("result present");
        assert_eq!(result.turn_index, 1);
    }

    #[test]
    fn stale_dispatch_loses_after_take() {
        let slot = GuidanceSlot::new();
        slot.publish(3, guidance(2));
        let _ = slot.take();

        // The watermark survives the take.
        assert!(!slot.publish(2, guidance(1)));
        assert!(slot.take().is_none());
    }

    #[test]
    fn parse_plain_json() {
        let raw = r#"{
            "turn_index": 4,
            "phase": "winding_down",
            "engagement": "high",
            "tone": "gentle",
            "next_topic_hint": "her garden",
            "reminder_directive": {"type": "deliver", "reminder_id": "rem-1"},
            "model_hint": "deep"
        }"#;
        let result = parse_guidance_response(raw).expect("parse");
        assert_eq!(result.turn_index, 4);
        assert_eq!(result.phase, Some(CallPhase::WindingDown));
        assert_eq!(result.engagement, EngagementLevel::High);
        assert_eq!(
            result.reminder_directive,
            Some(ReminderDirective::Deliver {
                reminder_id: "rem-1".to_owned()
            })
        );
        assert_eq!(result.model_hint, ModelHint::Deep);
    }

    #[test]
    fn parse_markdown_fenced_json() {
        let raw = "Here is my analysis:\n```json\n{\"turn_index\": 1, \"engagement\": \"low\", \"tone\": \"concerned\"}\n```";
        let result = parse_guidance_response(raw).expect("parse");
        assert_eq!(result.turn_index, 1);
        assert_eq!(result.tone, EmotionalTone::Concerned);
        // Omitted fields take defaults.
        assert!(result.phase.is_none());
        assert_eq!(result.model_hint, ModelHint::Fast);
    }

    #[test]
    fn parse_json_embedded_in_prose() {
        let raw = "Sure! {\"turn_index\": 2, \"engagement\": \"medium\", \"tone\": \"upbeat\"} Hope that helps.";
        let result = parse_guidance_response(raw).expect("parse");
        assert_eq!(result.turn_index, 2);
        assert_eq!(result.tone, EmotionalTone::Upbeat);
    }

    #[test]
    fn malformed_response_is_discarded() {
        assert!(parse_guidance_response("not json at all").is_none());
        assert!(parse_guidance_response("{\"turn_index\": \"nope\"}").is_none());
        assert!(parse_guidance_response("").is_none());
    }

    #[test]
    fn defer_directive_round_trips() {
        let json = "{\"type\": \"defer\"}";
        let parsed: ReminderDirective = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed, ReminderDirective::Defer);
    }
}
