//! Call phase state machine.
//!
//! Every call moves through four phases, forward only:
//!
//! ```text
//! ┌─────────┐      ┌──────┐      ┌──────────────┐      ┌─────────┐
//! │ Opening ├─────►│ Main ├─────►│ WindingDown  ├─────►│ Closing │
//! └─────────┘      └──────┘      └──────────────┘      └─────────┘
//! ```
//!
//! Transitions come from explicit directives (tool calls by the generative
//! service), guidance recommendations, or the time-budget fallback in the
//! orchestrator. A request to move backward or to the current phase is
//! ignored, never an error — callers include a lagging analyzer whose
//! recommendation may be a turn stale.

use serde::{Deserialize, Serialize};

/// The phase a call is currently in.
///
/// Ordering is meaningful: later phases compare greater, which is what makes
/// the forward-only rule a single comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// Greeting and settling in. Reminders hold back; topics open freely.
    #[default]
    Opening,
    /// The body of the conversation.
    Main,
    /// Wrapping up: last reminders, no big new threads.
    WindingDown,
    /// Farewell only. Terminal.
    Closing,
}

impl CallPhase {
    /// Whether new conversation topics may be introduced in this phase.
    #[must_use]
    pub fn allows_new_topics(self) -> bool {
        self != Self::Closing
    }

    /// Whether pending reminders may be delivered in this phase.
    ///
    /// Reminders are held out of the opening pleasantries and are pointless
    /// once the call is down to the farewell.
    #[must_use]
    pub fn allows_reminder_delivery(self) -> bool {
        matches!(self, Self::Main | Self::WindingDown)
    }

    /// Whether this is the terminal phase.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closing
    }
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Main => write!(f, "main"),
            Self::WindingDown => write!(f, "winding_down"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// What requested a phase transition, for logging and audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTrigger {
    /// Explicit tool-style directive from the generative service.
    Directive,
    /// Recommendation from the guidance analyzer.
    Guidance,
    /// Time-budget fallback in the orchestrator.
    TimeBudget,
}

/// Attempt to advance `current` to `target`.
///
/// Returns the new phase and whether a transition actually happened.
/// Backward and no-op requests leave the phase untouched.
pub fn advance(current: CallPhase, target: CallPhase, trigger: PhaseTrigger) -> (CallPhase, bool) {
    if target > current {
        tracing::debug!(from = %current, to = %target, ?trigger, "phase transition");
        (target, true)
    } else {
        (current, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_order_forward() {
        assert!(CallPhase::Opening < CallPhase::Main);
        assert!(CallPhase::Main < CallPhase::WindingDown);
        assert!(CallPhase::WindingDown < CallPhase::Closing);
    }

    #[test]
    fn advance_moves_forward() {
        let (phase, moved) = advance(CallPhase::Opening, CallPhase::Main, PhaseTrigger::Guidance);
        assert_eq!(phase, CallPhase::Main);
        assert!(moved);
    }

    #[test]
    fn advance_may_skip_forward() {
        // The hard time budget jumps straight to closing from anywhere.
        let (phase, moved) = advance(
            CallPhase::Opening,
            CallPhase::Closing,
            PhaseTrigger::TimeBudget,
        );
        assert_eq!(phase, CallPhase::Closing);
        assert!(moved);
    }

    #[test]
    fn advance_ignores_backward() {
        let (phase, moved) = advance(
            CallPhase::WindingDown,
            CallPhase::Main,
            PhaseTrigger::Guidance,
        );
        assert_eq!(phase, CallPhase::WindingDown);
        assert!(!moved);
    }

    #[test]
    fn advance_ignores_no_op() {
        let (phase, moved) = advance(CallPhase::Main, CallPhase::Main, PhaseTrigger::Directive);
        assert_eq!(phase, CallPhase::Main);
        assert!(!moved);
    }

    #[test]
    fn closing_permits_no_new_topics() {
        assert!(CallPhase::Opening.allows_new_topics());
        assert!(CallPhase::Main.allows_new_topics());
        assert!(CallPhase::WindingDown.allows_new_topics());
        assert!(!CallPhase::Closing.allows_new_topics());
    }

    #[test]
    fn reminders_only_in_main_and_winding_down() {
        assert!(!CallPhase::Opening.allows_reminder_delivery());
        assert!(CallPhase::Main.allows_reminder_delivery());
        assert!(CallPhase::WindingDown.allows_reminder_delivery());
        assert!(!CallPhase::Closing.allows_reminder_delivery());
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&CallPhase::WindingDown).expect("serialize");
        assert_eq!(json, "\"winding_down\"");
        let parsed: CallPhase = serde_json::from_str("\"closing\"").expect("parse");
        assert_eq!(parsed, CallPhase::Closing);
    }
}
