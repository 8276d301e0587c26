//! Shared types, constants, and helpers for the memory subsystem.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

// ---------------------------------------------------------------------------
// Global ID counter
// ---------------------------------------------------------------------------

pub(crate) static RECORD_COUNTER: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Schema / limits
// ---------------------------------------------------------------------------

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Embedding vector dimensions.
pub const EMBEDDING_DIM: usize = 1536;

/// Maximum length (in bytes) of memory content. Prevents unbounded growth
/// from excessively long extraction output.
pub(crate) const MAX_CONTENT_LEN: usize = 8_192;
pub(crate) const TRUNCATION_SUFFIX: &str = " [truncated]";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What kind of long-term memory a record holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A stable fact about the subject or their world.
    Fact,
    /// A like, dislike, or habit.
    Preference,
    /// A dated happening (visit, appointment, anniversary).
    Event,
    /// Something to watch — health, mood, safety. Always surfaces first.
    Concern,
    /// A person in the subject's life and how they relate.
    Relationship,
}

/// Where a memory came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Extracted automatically from a call summary.
    Extraction,
    /// Entered or edited by a caregiver.
    Manual,
}

// ---------------------------------------------------------------------------
// Core structs
// ---------------------------------------------------------------------------

/// A persisted long-term memory.
///
/// `importance` is the stored *base* score in `[0, 100]`. The score used for
/// ranking is the derived effective importance (see
/// [`ranking::effective_importance`](super::ranking::effective_importance)),
/// which is never written back; only explicit reinforcement (dedup merge or
/// a caregiver edit) mutates the base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub subject_id: String,
    pub kind: MemoryKind,
    pub content: String,
    /// Base importance score in `[0, 100]`.
    pub importance: f32,
    pub source: MemorySource,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub last_accessed_at: Option<u64>,
    /// Soft-archived records are excluded from default retrieval but kept
    /// for audit.
    #[serde(default)]
    pub archived: bool,
    /// Optional structured metadata (JSON blob).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A memory to be stored (no id or timestamps yet).
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub subject_id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub importance: f32,
    pub source: MemorySource,
    /// Embedding of `content`, [`EMBEDDING_DIM`] long.
    pub embedding: Vec<f32>,
    pub metadata: Option<serde_json::Value>,
}

/// Result of a store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new row was inserted.
    Inserted(String),
    /// A near-duplicate existed; its importance was reinforced instead.
    Reinforced(String),
}

impl StoreOutcome {
    /// The id of the inserted or reinforced record.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Inserted(id) | Self::Reinforced(id) => id,
        }
    }
}

/// One retrieved memory with its query-time scores.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHit {
    pub record: MemoryRecord,
    /// Cosine similarity to the query embedding, `[-1, 1]`.
    pub similarity: f32,
    /// Decayed, access-boosted importance at retrieval time.
    pub effective_importance: f32,
}

/// Tiered memory context for one turn.
///
/// `background` is populated only on a call's first turn; later turns omit
/// it to keep prompt size bounded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryContext {
    /// Concern-kind memories and anything with high effective importance.
    pub critical: Vec<MemoryHit>,
    /// Memories topically close to the current utterance.
    pub contextual: Vec<MemoryHit>,
    /// Everything else that cleared the retrieval floor.
    pub background: Vec<MemoryHit>,
}

impl MemoryContext {
    /// Total memories across all tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.critical.len() + self.contextual.len() + self.background.len()
    }

    /// Returns `true` if no tier holds any memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

pub(crate) fn display_kind(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::Fact => "fact",
        MemoryKind::Preference => "preference",
        MemoryKind::Event => "event",
        MemoryKind::Concern => "concern",
        MemoryKind::Relationship => "relationship",
    }
}

pub(crate) fn truncate_content(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= MAX_CONTENT_LEN {
        return trimmed.to_owned();
    }

    let max_bytes = MAX_CONTENT_LEN.saturating_sub(TRUNCATION_SUFFIX.len());
    let mut out = String::with_capacity(MAX_CONTENT_LEN);
    let mut used = 0usize;

    for ch in trimmed.chars() {
        let bytes = ch.len_utf8();
        if used.saturating_add(bytes) > max_bytes {
            break;
        }
        out.push(ch);
        used = used.saturating_add(bytes);
    }

    out.push_str(TRUNCATION_SUFFIX);
    out
}

pub(crate) fn new_id(prefix: &str) -> String {
    let counter = RECORD_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    format!("{prefix}-{}-{counter}", now_epoch_nanos())
}

pub(crate) fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn now_epoch_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
