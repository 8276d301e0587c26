//! Semantic long-term memory for lark.
//!
//! Sub-modules:
//! - `types`: Shared types, constants, enums, and helpers.
//! - `ranking`: Read-time effective-importance scoring and tier partitioning.
//! - `schema`: SQLite DDL definitions (plus the sqlite-vec virtual table).
//! - `sqlite`: SQLite-backed [`MemoryStore`] with dedup and ANN retrieval.
//! - `embedding`: [`Embedder`] trait, HTTP implementation, vector helpers.

pub mod embedding;
pub mod ranking;
pub(crate) mod schema;
pub mod sqlite;
pub mod types;

// Re-export everything the rest of the codebase imports from `crate::memory::*`.

// Types
pub use types::{
    MemoryContext, MemoryHit, MemoryKind, MemoryRecord, MemorySource, NewMemory, StoreOutcome,
    EMBEDDING_DIM,
};

// Ranking
pub use ranking::{effective_importance, partition_tiers, CRITICAL_IMPORTANCE};

// Store
pub use sqlite::{ensure_sqlite_vec_loaded, MemoryStore, MemoryStoreError};

// Embeddings
pub use embedding::{cosine_similarity, l2_normalize, Embedder, HttpEmbedder};
