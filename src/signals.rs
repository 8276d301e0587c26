//! Heuristic signal extraction for spoken utterances.
//!
//! Classifies a transcribed utterance against fixed keyword tables, one per
//! signal category. Categories fire independently — the result is a set, not
//! a single label. The scan is pure string matching over a lowercased copy
//! of the utterance (~µs), so it can gate the turn hot path.
//!
//! Goodbye handling is deliberately two-stage: a strong farewell does not
//! end the call by itself, it arms the [`GoodbyeGate`]. Continued
//! substantive speech inside the grace window retracts the pending
//! termination; an unretracted window ends the session. This keeps
//! conversational filler ("well, anyway...") from hanging up on people.

use crate::config::GoodbyeConfig;
use crate::phase::CallPhase;
use serde::Serialize;
use std::time::{Duration, Instant};

/// A category of signal an utterance can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    /// Physical-health mentions (symptoms, medication, appointments).
    Health,
    /// Emotional state (loneliness, worry, joy).
    Emotion,
    /// Family and relationship mentions.
    Family,
    /// Safety signals that require escalation.
    Safety,
    /// Farewell phrases.
    Goodbye,
    /// Factual curiosity (news, weather, questions about the world).
    Curiosity,
    /// Possible confusion or memory trouble.
    Cognitive,
}

/// How firmly a pattern fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    /// Suggestive match — worth noting in context, not acting on alone.
    Weak,
    /// Unambiguous match — may trigger behaviour (escalation, goodbye arm).
    Strong,
}

/// A single fired pattern.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    /// The category this pattern belongs to.
    pub category: SignalCategory,
    /// The phrase that matched.
    pub matched: &'static str,
    /// Match strength.
    pub strength: SignalStrength,
}

/// The full set of signals fired by one utterance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalSet {
    /// Every pattern hit, in table order.
    pub signals: Vec<Signal>,
}

impl SignalSet {
    /// Returns `true` if any pattern in `category` fired.
    #[must_use]
    pub fn contains(&self, category: SignalCategory) -> bool {
        self.signals.iter().any(|s| s.category == category)
    }

    /// Strongest hit in `category`, if any fired.
    #[must_use]
    pub fn strength(&self, category: SignalCategory) -> Option<SignalStrength> {
        self.signals
            .iter()
            .filter(|s| s.category == category)
            .map(|s| s.strength)
            .max()
    }

    /// Returns `true` if the utterance carries a strong safety signal.
    ///
    /// A strong safety hit short-circuits turn preparation: the session is
    /// marked for escalation and graceful close.
    #[must_use]
    pub fn requires_escalation(&self) -> bool {
        self.strength(SignalCategory::Safety) == Some(SignalStrength::Strong)
    }

    /// Returns `true` if the utterance carries a strong goodbye.
    #[must_use]
    pub fn strong_goodbye(&self) -> bool {
        self.strength(SignalCategory::Goodbye) == Some(SignalStrength::Strong)
    }
}

// ── Pattern tables ──────────────────────────────────────────────────────

const HEALTH_PATTERNS: &[(&str, SignalStrength)] = &[
    ("pain", SignalStrength::Weak),
    ("dizzy", SignalStrength::Strong),
    ("medication", SignalStrength::Weak),
    ("pills", SignalStrength::Weak),
    ("doctor", SignalStrength::Weak),
    ("appointment", SignalStrength::Weak),
    ("tired", SignalStrength::Weak),
    ("sick", SignalStrength::Weak),
    ("hospital", SignalStrength::Strong),
    ("hurt", SignalStrength::Weak),
    ("blood pressure", SignalStrength::Weak),
    ("sleeping badly", SignalStrength::Weak),
    ("headache", SignalStrength::Weak),
];

const EMOTION_PATTERNS: &[(&str, SignalStrength)] = &[
    ("lonely", SignalStrength::Strong),
    ("alone", SignalStrength::Weak),
    ("sad", SignalStrength::Weak),
    ("miss him", SignalStrength::Weak),
    ("miss her", SignalStrength::Weak),
    ("worried", SignalStrength::Weak),
    ("anxious", SignalStrength::Weak),
    ("scared", SignalStrength::Weak),
    ("happy", SignalStrength::Weak),
    ("wonderful", SignalStrength::Weak),
    ("upset", SignalStrength::Weak),
    ("crying", SignalStrength::Strong),
    ("depressed", SignalStrength::Strong),
];

const FAMILY_PATTERNS: &[(&str, SignalStrength)] = &[
    ("daughter", SignalStrength::Weak),
    ("son", SignalStrength::Weak),
    ("grandson", SignalStrength::Weak),
    ("granddaughter", SignalStrength::Weak),
    ("grandkids", SignalStrength::Weak),
    ("grandchildren", SignalStrength::Weak),
    ("sister", SignalStrength::Weak),
    ("brother", SignalStrength::Weak),
    ("husband", SignalStrength::Weak),
    ("wife", SignalStrength::Weak),
    ("niece", SignalStrength::Weak),
    ("nephew", SignalStrength::Weak),
];

const SAFETY_PATTERNS: &[(&str, SignalStrength)] = &[
    ("help me", SignalStrength::Strong),
    ("i fell", SignalStrength::Strong),
    ("i've fallen", SignalStrength::Strong),
    ("can't get up", SignalStrength::Strong),
    ("chest pain", SignalStrength::Strong),
    ("can't breathe", SignalStrength::Strong),
    ("call 911", SignalStrength::Strong),
    ("call an ambulance", SignalStrength::Strong),
    ("emergency", SignalStrength::Strong),
    ("someone is in the house", SignalStrength::Strong),
    ("smoke", SignalStrength::Weak),
    ("burning", SignalStrength::Weak),
];

const GOODBYE_PATTERNS: &[(&str, SignalStrength)] = &[
    ("goodbye", SignalStrength::Strong),
    ("bye now", SignalStrength::Strong),
    ("bye bye", SignalStrength::Strong),
    ("talk to you later", SignalStrength::Strong),
    ("talk to you soon", SignalStrength::Strong),
    ("gotta go", SignalStrength::Strong),
    ("have to go", SignalStrength::Strong),
    ("i should go", SignalStrength::Strong),
    ("see you later", SignalStrength::Strong),
    ("good night", SignalStrength::Strong),
    ("bye", SignalStrength::Weak),
    ("anyway", SignalStrength::Weak),
    ("that's all", SignalStrength::Weak),
];

const CURIOSITY_PATTERNS: &[(&str, SignalStrength)] = &[
    ("what's the news", SignalStrength::Strong),
    ("any news", SignalStrength::Weak),
    ("tell me about", SignalStrength::Weak),
    ("i wonder", SignalStrength::Weak),
    ("did you hear", SignalStrength::Weak),
    ("who won", SignalStrength::Weak),
    ("weather", SignalStrength::Weak),
    ("what happened", SignalStrength::Weak),
];

const COGNITIVE_PATTERNS: &[(&str, SignalStrength)] = &[
    ("can't remember", SignalStrength::Strong),
    ("i forget", SignalStrength::Weak),
    ("i forgot", SignalStrength::Weak),
    ("what day is it", SignalStrength::Strong),
    ("confused", SignalStrength::Weak),
    ("where am i", SignalStrength::Strong),
    ("who are you again", SignalStrength::Strong),
];

const CATEGORY_TABLES: &[(SignalCategory, &[(&str, SignalStrength)])] = &[
    (SignalCategory::Safety, SAFETY_PATTERNS),
    (SignalCategory::Health, HEALTH_PATTERNS),
    (SignalCategory::Emotion, EMOTION_PATTERNS),
    (SignalCategory::Family, FAMILY_PATTERNS),
    (SignalCategory::Goodbye, GOODBYE_PATTERNS),
    (SignalCategory::Curiosity, CURIOSITY_PATTERNS),
    (SignalCategory::Cognitive, COGNITIVE_PATTERNS),
];

/// Classify an utterance against every pattern table.
///
/// `phase` shifts goodbye sensitivity: once the call is winding down or
/// closing, weak farewell phrases count as strong, since a brief "bye" at
/// that point is almost certainly genuine.
#[must_use]
pub fn classify(utterance: &str, phase: CallPhase) -> SignalSet {
    let normalized = normalize(utterance);
    let mut set = SignalSet::default();

    for (category, table) in CATEGORY_TABLES.iter().copied() {
        for (phrase, strength) in table.iter().copied() {
            if contains_phrase(&normalized, phrase) {
                let strength = if category == SignalCategory::Goodbye
                    && phase >= CallPhase::WindingDown
                {
                    SignalStrength::Strong
                } else {
                    strength
                };
                set.signals.push(Signal {
                    category,
                    matched: phrase,
                    strength,
                });
            }
        }
    }

    set
}

/// Lowercase and strip to word characters so phrase matching is
/// boundary-aware ("bye" must not match inside "maybe").
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '\'' {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !out.ends_with(' ') {
        out.push(' ');
    }
    out
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let padded = format!(" {phrase} ");
    normalized.contains(&padded)
}

/// Number of whitespace-separated words in an utterance.
#[must_use]
pub fn word_count(utterance: &str) -> usize {
    utterance.split_whitespace().count()
}

// ── Goodbye grace gate ──────────────────────────────────────────────────

/// Outcome of feeding one utterance through the goodbye gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoodbyeDecision {
    /// No pending goodbye and none started.
    None,
    /// A strong goodbye armed the gate; the grace window is running.
    Armed,
    /// Substantive speech cancelled a pending goodbye.
    Retracted,
    /// The grace window elapsed unretracted — end the session.
    Finalized,
}

/// Grace-period gate between a farewell signal and actually ending the call.
#[derive(Debug, Clone)]
pub struct GoodbyeGate {
    pending_since: Option<Instant>,
    grace: Duration,
    min_retraction_words: usize,
}

impl GoodbyeGate {
    /// Build a gate from configuration.
    #[must_use]
    pub fn new(config: &GoodbyeConfig) -> Self {
        Self {
            pending_since: None,
            grace: Duration::from_secs(config.grace_secs),
            min_retraction_words: config.min_retraction_words,
        }
    }

    /// Returns `true` if a goodbye is pending and still inside its window.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Feed one classified utterance through the gate.
    ///
    /// Order matters: an already-expired window finalizes before the new
    /// utterance is considered, so speech arriving after the grace period
    /// cannot resurrect the call.
    pub fn observe(&mut self, utterance: &str, signals: &SignalSet, now: Instant) -> GoodbyeDecision {
        if let Some(armed_at) = self.pending_since {
            if now.duration_since(armed_at) >= self.grace {
                return GoodbyeDecision::Finalized;
            }
            if self.is_retraction(utterance, signals) {
                self.pending_since = None;
                return GoodbyeDecision::Retracted;
            }
            // Still pending; a repeated goodbye keeps the original deadline.
            return GoodbyeDecision::Armed;
        }

        if signals.strong_goodbye() {
            self.pending_since = Some(now);
            return GoodbyeDecision::Armed;
        }

        GoodbyeDecision::None
    }

    /// Timer-driven check with no new utterance (e.g. silence after "bye").
    #[must_use]
    pub fn poll(&self, now: Instant) -> GoodbyeDecision {
        match self.pending_since {
            Some(armed_at) if now.duration_since(armed_at) >= self.grace => {
                GoodbyeDecision::Finalized
            }
            Some(_) => GoodbyeDecision::Armed,
            None => GoodbyeDecision::None,
        }
    }

    fn is_retraction(&self, utterance: &str, signals: &SignalSet) -> bool {
        word_count(utterance) >= self.min_retraction_words
            && !signals.contains(SignalCategory::Goodbye)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(grace_secs: u64) -> GoodbyeGate {
        GoodbyeGate::new(&GoodbyeConfig {
            grace_secs,
            min_retraction_words: 4,
        })
    }

    #[test]
    fn health_and_family_fire_independently() {
        let set = classify(
            "my daughter took me to the doctor yesterday",
            CallPhase::Main,
        );
        assert!(set.contains(SignalCategory::Health));
        assert!(set.contains(SignalCategory::Family));
        assert!(!set.contains(SignalCategory::Safety));
    }

    #[test]
    fn safety_requires_escalation() {
        let set = classify("I have chest pain, call an ambulance", CallPhase::Main);
        assert!(set.requires_escalation());
    }

    #[test]
    fn smoke_alone_is_weak_safety() {
        let set = classify("I smell smoke from the neighbor's yard", CallPhase::Main);
        assert!(set.contains(SignalCategory::Safety));
        assert!(!set.requires_escalation());
    }

    #[test]
    fn bye_does_not_match_inside_maybe() {
        let set = classify("maybe we could talk about the garden", CallPhase::Main);
        assert!(!set.contains(SignalCategory::Goodbye));
    }

    #[test]
    fn strong_goodbye_detected() {
        let set = classify("alright, talk to you later", CallPhase::Main);
        assert!(set.strong_goodbye());
    }

    #[test]
    fn weak_goodbye_stays_weak_in_main_phase() {
        let set = classify("anyway, the garden is doing fine", CallPhase::Main);
        assert_eq!(
            set.strength(SignalCategory::Goodbye),
            Some(SignalStrength::Weak)
        );
        assert!(!set.strong_goodbye());
    }

    #[test]
    fn weak_goodbye_upgrades_when_winding_down() {
        let set = classify("okay bye", CallPhase::WindingDown);
        assert!(set.strong_goodbye());
    }

    #[test]
    fn cognitive_confusion_detected() {
        let set = classify("I'm sorry, who are you again?", CallPhase::Opening);
        assert_eq!(
            set.strength(SignalCategory::Cognitive),
            Some(SignalStrength::Strong)
        );
    }

    #[test]
    fn empty_utterance_fires_nothing() {
        let set = classify("", CallPhase::Main);
        assert!(set.signals.is_empty());
    }

    // ── Goodbye gate ────────────────────────────────────────────────────

    #[test]
    fn strong_goodbye_arms_gate() {
        let mut g = gate(6);
        let now = Instant::now();
        let set = classify("goodbye dear", CallPhase::Main);
        assert_eq!(g.observe("goodbye dear", &set, now), GoodbyeDecision::Armed);
        assert!(g.is_pending());
    }

    #[test]
    fn substantive_speech_retracts_pending_goodbye() {
        let mut g = gate(6);
        let now = Instant::now();
        let bye = classify("well, gotta go", CallPhase::Main);
        assert_eq!(g.observe("well, gotta go", &bye, now), GoodbyeDecision::Armed);

        let follow_up = "oh wait, before I forget, the plumber came today";
        let set = classify(follow_up, CallPhase::Main);
        assert_eq!(
            g.observe(follow_up, &set, now + Duration::from_secs(2)),
            GoodbyeDecision::Retracted
        );
        assert!(!g.is_pending());
    }

    #[test]
    fn short_filler_does_not_retract() {
        let mut g = gate(6);
        let now = Instant::now();
        let bye = classify("goodbye", CallPhase::Main);
        g.observe("goodbye", &bye, now);

        let set = classify("okay then", CallPhase::Main);
        assert_eq!(
            g.observe("okay then", &set, now + Duration::from_secs(2)),
            GoodbyeDecision::Armed
        );
        assert!(g.is_pending());
    }

    #[test]
    fn window_elapse_finalizes() {
        let mut g = gate(6);
        let now = Instant::now();
        let bye = classify("good night", CallPhase::Main);
        g.observe("good night", &bye, now);

        let late = "actually there was one more thing I wanted to mention";
        let set = classify(late, CallPhase::Main);
        assert_eq!(
            g.observe(late, &set, now + Duration::from_secs(7)),
            GoodbyeDecision::Finalized
        );
    }

    #[test]
    fn poll_finalizes_on_silence() {
        let mut g = gate(6);
        let now = Instant::now();
        let bye = classify("bye now", CallPhase::Main);
        g.observe("bye now", &bye, now);

        assert_eq!(g.poll(now + Duration::from_secs(3)), GoodbyeDecision::Armed);
        assert_eq!(
            g.poll(now + Duration::from_secs(6)),
            GoodbyeDecision::Finalized
        );
    }

    #[test]
    fn repeated_goodbye_keeps_original_deadline() {
        let mut g = gate(6);
        let now = Instant::now();
        let bye = classify("goodbye", CallPhase::Main);
        g.observe("goodbye", &bye, now);
        // Second goodbye 3s in does not restart the window.
        g.observe("goodbye", &bye, now + Duration::from_secs(3));
        assert_eq!(
            g.poll(now + Duration::from_secs(6)),
            GoodbyeDecision::Finalized
        );
    }
}
