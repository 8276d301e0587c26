//! Read-time scoring and tier partitioning for retrieved memories.
//!
//! Effective importance is always derived here from the stored base score;
//! nothing in this module writes back to the store.

use super::types::{MemoryContext, MemoryHit, MemoryKind, MemoryRecord};

/// Importance half-life in days.
pub const HALF_LIFE_DAYS: f32 = 30.0;

/// Maximum boost for a recently accessed memory.
pub const ACCESS_BOOST: f32 = 10.0;

/// Days over which the access boost fades linearly to zero.
pub const ACCESS_BOOST_WINDOW_DAYS: f32 = 7.0;

/// Effective importance at or above which a memory is critical-tier.
pub const CRITICAL_IMPORTANCE: f32 = 80.0;

pub(crate) const SECS_PER_DAY: f32 = 86_400.0;

/// Compute a record's effective importance at time `now` (epoch seconds).
///
/// `base * 0.5^(age_days / 30)`, plus an access boost of
/// `10 * (1 - days_since_access / 7)` when the record was accessed within
/// the last 7 days. Capped at 100.
#[must_use]
pub fn effective_importance(record: &MemoryRecord, now: u64) -> f32 {
    let age_days = now.saturating_sub(record.created_at) as f32 / SECS_PER_DAY;
    let mut effective = record.importance * 0.5f32.powf(age_days / HALF_LIFE_DAYS);

    if let Some(accessed_at) = record.last_accessed_at {
        let days_since = now.saturating_sub(accessed_at) as f32 / SECS_PER_DAY;
        if days_since < ACCESS_BOOST_WINDOW_DAYS {
            effective += ACCESS_BOOST * (1.0 - days_since / ACCESS_BOOST_WINDOW_DAYS);
        }
    }

    effective.min(100.0)
}

/// Partition ranked hits into critical / contextual / background tiers.
///
/// - **critical**: concern-kind records, or effective importance ≥
///   [`CRITICAL_IMPORTANCE`].
/// - **contextual**: similarity to the current utterance ≥
///   `contextual_similarity`.
/// - **background**: the rest — only kept when `include_background` is set
///   (the call's first turn).
///
/// Hits keep their incoming order within each tier, so callers should sort
/// by effective importance first.
#[must_use]
pub fn partition_tiers(
    hits: Vec<MemoryHit>,
    contextual_similarity: f32,
    include_background: bool,
) -> MemoryContext {
    let mut context = MemoryContext::default();

    for hit in hits {
        if hit.record.kind == MemoryKind::Concern
            || hit.effective_importance >= CRITICAL_IMPORTANCE
        {
            context.critical.push(hit);
        } else if hit.similarity >= contextual_similarity {
            context.contextual.push(hit);
        } else if include_background {
            context.background.push(hit);
        }
    }

    context
}
