//! Post-call memory extraction.
//!
//! After a call ends, a summariser (external, treated as a black box)
//! produces a JSON batch of candidate memories from the transcript. This
//! module parses that batch leniently and commits it through the store's
//! dedup path. Everything here is best-effort: a malformed batch yields an
//! empty result and a `warn!`, a failed embed skips that one memory — the
//! session teardown never fails because extraction did.

use crate::memory::types::{MemoryKind, MemorySource, NewMemory};
use crate::memory::{Embedder, MemoryStore, StoreOutcome};
use lark_guard::{retry_guarded, Backoff, GuardHandle};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum memories accepted from a single extraction pass.
const MAX_MEMORIES: usize = 12;

/// Embedding attempts per memory. Extraction runs outside any live call,
/// so a short retry is affordable here where the turn hot path never
/// retries.
const EMBED_ATTEMPTS: u32 = 2;

/// One candidate memory from the summariser.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedMemory {
    /// Memory kind.
    pub kind: MemoryKind,
    /// Memory content.
    pub content: String,
    /// Base importance in `[0, 100]`.
    pub importance: f32,
    /// Optional structured metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl ExtractedMemory {
    fn is_valid(&self) -> bool {
        !self.content.trim().is_empty() && (0.0..=100.0).contains(&self.importance)
    }
}

/// A parsed extraction batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionBatch {
    /// Candidate memories, already validated and clamped.
    #[serde(default)]
    pub memories: Vec<ExtractedMemory>,
}

/// What happened when a batch was applied to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// New rows inserted.
    pub inserted: usize,
    /// Near-duplicates that reinforced an existing row.
    pub reinforced: usize,
    /// Memories skipped because embedding or storage failed.
    pub failed: usize,
}

/// Parse a summariser response into an [`ExtractionBatch`].
///
/// Accepts raw text (which may contain markdown fences or extra prose) and
/// returns an empty batch on failure rather than an error, since extraction
/// is best-effort and must never block session teardown.
#[must_use]
pub fn parse_extraction_response(raw: &str) -> ExtractionBatch {
    let json_str = extract_json_block(raw);

    match serde_json::from_str::<ExtractionBatch>(json_str) {
        Ok(mut batch) => {
            batch.memories.retain(ExtractedMemory::is_valid);
            if batch.memories.len() > MAX_MEMORIES {
                batch.memories.truncate(MAX_MEMORIES);
            }
            batch
        }
        Err(e) => {
            if !json_str.trim().is_empty() {
                warn!("memory extraction parse failed: {e}");
            }
            ExtractionBatch::default()
        }
    }
}

/// Extract the JSON body from a potentially markdown-fenced response.
fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    if let Some(start) = trimmed.find('{')
        && let Some(end) = trimmed.rfind('}')
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

/// Embed and store every memory in a batch for `subject_id`.
///
/// Embedding goes through the guard like any other external call, with a
/// small retry bound; a memory whose embeds all fail is counted and
/// skipped.
pub async fn apply_extraction(
    store: &MemoryStore,
    embedder: &dyn Embedder,
    guard: &GuardHandle,
    embed_timeout: Duration,
    subject_id: &str,
    batch: ExtractionBatch,
) -> ExtractionReport {
    let mut report = ExtractionReport::default();
    let backoff = Backoff {
        base: Duration::from_millis(200),
        factor: 2,
        max: Duration::from_secs(2),
        jitter: 0.1,
    };

    for memory in batch.memories {
        let embedding = match retry_guarded(
            guard,
            crate::orchestrator::SERVICE_EMBEDDING,
            embed_timeout,
            &backoff,
            EMBED_ATTEMPTS,
            || embedder.embed(&memory.content),
        )
        .await
        {
            Ok(embedding) => embedding,
            Err(e) => {
                debug!(error = %e, "skipping memory, embedding unavailable");
                report.failed += 1;
                continue;
            }
        };

        let outcome = store.store(NewMemory {
            subject_id: subject_id.to_owned(),
            kind: memory.kind,
            content: memory.content,
            importance: memory.importance,
            source: MemorySource::Extraction,
            embedding,
            metadata: memory.metadata,
        });

        match outcome {
            Ok(StoreOutcome::Inserted(_)) => report.inserted += 1,
            Ok(StoreOutcome::Reinforced(_)) => report.reinforced += 1,
            Err(e) => {
                warn!(error = %e, "memory store write failed");
                report.failed += 1;
            }
        }
    }

    debug!(
        inserted = report.inserted,
        reinforced = report.reinforced,
        failed = report.failed,
        "extraction batch applied"
    );
    report
}
