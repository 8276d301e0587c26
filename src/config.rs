//! Configuration types for the call orchestration core.
//!
//! Every knob lives in a typed struct with a documented default; there is no
//! free-form settings dictionary. Configuration is loaded once at process
//! start (or once per session for per-call overrides) and passed by value.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the call orchestration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LarkConfig {
    /// Call time budgets and phase forcing.
    pub call: CallBudgetConfig,
    /// Goodbye grace-period gate settings.
    pub goodbye: GoodbyeConfig,
    /// Memory store settings (paths, thresholds).
    pub memory: MemoryStoreConfig,
    /// Guidance analyzer endpoint settings.
    pub guidance: GuidanceConfig,
    /// Embedding endpoint settings.
    pub embedding: EmbeddingConfig,
    /// Circuit breaker settings shared by all external calls.
    pub guard: GuardConfig,
    /// Outbound call scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Health/status HTTP surface settings.
    pub status: StatusConfig,
}

/// Call duration budgets.
///
/// The soft budget forces the phase toward `winding_down`; the hard budget
/// forces `closing` on the next orchestration step regardless of guidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallBudgetConfig {
    /// Elapsed seconds after which the call is steered to winding down.
    pub soft_limit_secs: u64,
    /// Elapsed seconds after which the call is forced to closing.
    pub hard_limit_secs: u64,
}

impl Default for CallBudgetConfig {
    fn default() -> Self {
        Self {
            soft_limit_secs: 480,
            hard_limit_secs: 600,
        }
    }
}

/// Goodbye grace-period settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoodbyeConfig {
    /// Seconds a pending goodbye stays retractable before it finalizes.
    pub grace_secs: u64,
    /// Minimum word count for an utterance to count as a retraction.
    pub min_retraction_words: usize,
}

impl Default for GoodbyeConfig {
    fn default() -> Self {
        Self {
            grace_secs: 6,
            min_retraction_words: 4,
        }
    }
}

/// Memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Directory holding the SQLite database file.
    pub root_dir: PathBuf,
    /// Maximum candidates pulled from the ANN index per query.
    pub retrieval_limit: usize,
    /// Minimum cosine similarity for a memory to be retrieved at all.
    pub similarity_floor: f32,
    /// Cosine similarity at which a memory counts as topic-relevant
    /// (contextual tier).
    pub contextual_similarity: f32,
    /// Cosine similarity above which a new memory is merged into an
    /// existing one instead of inserted.
    pub dedup_similarity: f32,
    /// Days without access before a low-importance memory is archived.
    pub archive_after_days: u64,
    /// Effective-importance floor below which stale memories are archived.
    pub archive_floor: f32,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("data"),
            retrieval_limit: 12,
            similarity_floor: 0.70,
            contextual_similarity: 0.78,
            dedup_similarity: 0.90,
            archive_after_days: 90,
            archive_floor: 10.0,
        }
    }
}

/// Guidance analyzer endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Analyzer endpoint URL.
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8810/analyze".to_owned(),
            timeout_secs: 5,
        }
    }
}

/// Embedding endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding endpoint URL.
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8811/embed".to_owned(),
            timeout_secs: 4,
        }
    }
}

/// Circuit breaker settings shared across external dependencies.
///
/// Each dependency gets an independent circuit; these values apply to all
/// of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Consecutive failures before a circuit opens.
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before allowing a probe.
    pub cooldown_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

impl GuardConfig {
    /// Convert into the `lark-guard` breaker configuration.
    #[must_use]
    pub fn to_breaker_config(&self) -> lark_guard::CircuitBreakerConfig {
        lark_guard::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown_secs: self.cooldown_secs,
        }
    }
}

/// Outbound call scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    pub tick_secs: u64,
    /// Maximum delivery attempts per outbound call.
    pub max_attempts: u32,
    /// Base retry delay in seconds.
    pub backoff_base_secs: u64,
    /// Upper bound on any single retry delay, in seconds.
    pub backoff_max_secs: u64,
    /// Path for persisted scheduler state (None = in-memory only).
    pub state_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            max_attempts: 4,
            backoff_base_secs: 30,
            backoff_max_secs: 30 * 60,
            state_path: None,
        }
    }
}

/// Health/status HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Bind address for the status server.
    pub bind_addr: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8700".to_owned(),
        }
    }
}

impl LarkConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CallError::Config`] if the file cannot be
    /// read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::CallError::Config(e.to_string()))
    }

    /// Serialize this configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CallError::Config`] on serialization failure
    /// or an I/O error on write failure.
    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CallError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
