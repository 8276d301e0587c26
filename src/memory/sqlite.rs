//! SQLite-backed memory store.
//!
//! A single database file at `{root_dir}/lark.db` holds the `memories`
//! table plus a sqlite-vec `vec_memories` virtual table for approximate
//! nearest-neighbour retrieval over the 1536-dim embeddings.
//!
//! Thread-safe via an internal `Mutex<Connection>`. All writes are
//! serialized; reads can proceed concurrently with WAL mode on the SQLite
//! side, though we still acquire the mutex for simplicity.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use rusqlite::{params, Connection};
use tracing::debug;

use super::embedding::{cosine_similarity, l2_normalize};
use super::ranking::{effective_importance, partition_tiers};
use super::schema::{apply_schema, apply_vec_schema, read_schema_version};
use super::types::{
    display_kind, new_id, now_epoch_secs, truncate_content, MemoryContext, MemoryHit, MemoryKind,
    MemoryRecord, MemorySource, NewMemory, StoreOutcome, EMBEDDING_DIM,
};
use crate::config::MemoryStoreConfig;

/// Database filename within the memory root directory.
const DB_FILENAME: &str = "lark.db";

/// Over-fetch multiplier for ANN candidates. The vec index spans all
/// subjects while queries are per-subject, so we pull extra candidates and
/// filter.
const CANDIDATE_MULTIPLIER: usize = 8;
const MIN_CANDIDATES: usize = 64;

/// Base-importance bump applied when a near-duplicate reinforces an
/// existing memory.
const REINFORCE_BUMP: f32 = 5.0;

/// Register sqlite-vec as an auto extension, once per process.
///
/// Must run before any connection that touches `vec_memories` is opened.
pub fn ensure_sqlite_vec_loaded() {
    static LOADED: OnceLock<()> = OnceLock::new();
    LOADED.get_or_init(|| unsafe {
        let entry = sqlite_vec::sqlite3_vec_init as *const ();
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(entry)));
    });
}

/// SQLite-backed memory store.
pub struct MemoryStore {
    root: PathBuf,
    conn: Mutex<Connection>,
    config: MemoryStoreConfig,
}

impl MemoryStore {
    /// Open (or create) the database at `{root_dir}/lark.db`.
    ///
    /// Applies the schema if the database is new.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open(config: &MemoryStoreConfig) -> Result<Self, MemoryStoreError> {
        ensure_sqlite_vec_loaded();
        std::fs::create_dir_all(&config.root_dir)
            .map_err(|e| MemoryStoreError::Io(e.to_string()))?;
        let db_path = config.root_dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        apply_schema(&conn)?;
        apply_vec_schema(&conn)?;
        Ok(Self {
            root: config.root_dir.clone(),
            conn: Mutex::new(conn),
            config: config.clone(),
        })
    }

    /// Open an in-memory store (tests and ephemeral tooling).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory(config: &MemoryStoreConfig) -> Result<Self, MemoryStoreError> {
        ensure_sqlite_vec_loaded();
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        apply_vec_schema(&conn)?;
        Ok(Self {
            root: PathBuf::new(),
            conn: Mutex::new(conn),
            config: config.clone(),
        })
    }

    /// Returns the root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the current schema version from the database.
    pub fn schema_version(&self) -> Result<Option<u32>, MemoryStoreError> {
        let conn = self.lock()?;
        read_schema_version(&conn).map_err(MemoryStoreError::Sqlite)
    }

    /// Store a memory, deduplicating against the subject's existing rows.
    ///
    /// If the nearest existing memory for the same subject has cosine
    /// similarity above the dedup threshold, that record is reinforced
    /// (base importance bumped, access refreshed) instead of inserting a
    /// near-identical row.
    pub fn store(&self, memory: NewMemory) -> Result<StoreOutcome, MemoryStoreError> {
        if memory.embedding.len() != EMBEDDING_DIM {
            return Err(MemoryStoreError::Dimension {
                expected: EMBEDDING_DIM,
                got: memory.embedding.len(),
            });
        }
        let embedding = l2_normalize(&memory.embedding);
        let now = now_epoch_secs();
        let conn = self.lock()?;

        if let Some((existing_id, similarity)) =
            self.nearest_for_subject(&conn, &memory.subject_id, &embedding)?
        {
            if similarity > self.config.dedup_similarity {
                conn.execute(
                    "UPDATE memories SET importance = MIN(100.0, importance + ?1), \
                     last_accessed_at = ?2, updated_at = ?2 WHERE id = ?3",
                    params![REINFORCE_BUMP, now, existing_id],
                )?;
                debug!(id = %existing_id, similarity, "near-duplicate memory reinforced");
                return Ok(StoreOutcome::Reinforced(existing_id));
            }
        }

        let id = new_id(display_kind(memory.kind));
        let content = truncate_content(&memory.content);
        let blob = embedding_to_blob(&embedding);
        let metadata_json = memory
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO memories \
             (id, subject_id, kind, content, importance, source, created_at, updated_at, \
              last_accessed_at, archived, embedding, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, NULL, 0, ?8, ?9)",
            params![
                id,
                memory.subject_id,
                kind_to_str(memory.kind),
                content,
                memory.importance.clamp(0.0, 100.0),
                source_to_str(memory.source),
                now,
                blob,
                metadata_json,
            ],
        )?;
        tx.execute(
            "INSERT INTO vec_memories (memory_id, embedding) VALUES (?1, ?2)",
            params![id, blob],
        )?;
        tx.commit()?;

        Ok(StoreOutcome::Inserted(id))
    }

    /// Search a subject's memories by query embedding.
    ///
    /// Candidates come from the ANN index; exact cosine similarity is
    /// recomputed in Rust, rows below the similarity floor are dropped, and
    /// the survivors are ranked by effective importance. Returned hits are
    /// marked accessed (which is what feeds the access boost on later
    /// retrievals — scores in the returned hits predate the marking).
    pub fn search(
        &self,
        subject_id: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<MemoryHit>, MemoryStoreError> {
        if query_embedding.len() != EMBEDDING_DIM {
            return Err(MemoryStoreError::Dimension {
                expected: EMBEDDING_DIM,
                got: query_embedding.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = l2_normalize(query_embedding);
        let now = now_epoch_secs();
        let conn = self.lock()?;

        let mut hits = self.candidate_hits(&conn, subject_id, &query, now)?;
        hits.retain(|h| h.similarity >= self.config.similarity_floor);
        hits.sort_by(|a, b| {
            b.effective_importance
                .partial_cmp(&a.effective_importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        if !hits.is_empty() {
            let mut stmt =
                conn.prepare("UPDATE memories SET last_accessed_at = ?1 WHERE id = ?2")?;
            for hit in &hits {
                stmt.execute(params![now, hit.record.id])?;
            }
        }

        Ok(hits)
    }

    /// Build the tiered memory context for one turn.
    ///
    /// Background tier is included only on the first turn (`turn_count == 0`).
    pub fn build_context(
        &self,
        subject_id: &str,
        query_embedding: &[f32],
        turn_count: u32,
    ) -> Result<MemoryContext, MemoryStoreError> {
        let hits = self.search(subject_id, query_embedding, self.config.retrieval_limit)?;
        Ok(partition_tiers(
            hits,
            self.config.contextual_similarity,
            turn_count == 0,
        ))
    }

    /// Critical-tier-only context, used when no query embedding is
    /// available (embedding service degraded).
    ///
    /// Returns active concern-kind memories plus anything whose effective
    /// importance clears the critical bar, ranked by effective importance.
    pub fn critical_context(&self, subject_id: &str) -> Result<MemoryContext, MemoryStoreError> {
        let now = now_epoch_secs();
        let records = self.list_for_subject(subject_id, false)?;

        let mut critical: Vec<MemoryHit> = records
            .into_iter()
            .map(|record| {
                let eff = effective_importance(&record, now);
                MemoryHit {
                    record,
                    similarity: 0.0,
                    effective_importance: eff,
                }
            })
            .filter(|h| {
                h.record.kind == MemoryKind::Concern
                    || h.effective_importance >= super::ranking::CRITICAL_IMPORTANCE
            })
            .collect();

        critical.sort_by(|a, b| {
            b.effective_importance
                .partial_cmp(&a.effective_importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        critical.truncate(self.config.retrieval_limit);

        Ok(MemoryContext {
            critical,
            contextual: Vec::new(),
            background: Vec::new(),
        })
    }

    /// List a subject's memories, newest first.
    pub fn list_for_subject(
        &self,
        subject_id: &str,
        include_archived: bool,
    ) -> Result<Vec<MemoryRecord>, MemoryStoreError> {
        let conn = self.lock()?;
        let sql = if include_archived {
            "SELECT id, subject_id, kind, content, importance, source, created_at, \
             updated_at, last_accessed_at, archived, metadata FROM memories \
             WHERE subject_id = ?1 ORDER BY updated_at DESC"
        } else {
            "SELECT id, subject_id, kind, content, importance, source, created_at, \
             updated_at, last_accessed_at, archived, metadata FROM memories \
             WHERE subject_id = ?1 AND archived = 0 ORDER BY updated_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![subject_id], row_to_record)?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }

    /// Fetch a single record by id.
    pub fn get(&self, id: &str) -> Result<MemoryRecord, MemoryStoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, kind, content, importance, source, created_at, \
             updated_at, last_accessed_at, archived, metadata FROM memories WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_record)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Err(MemoryStoreError::NotFound(id.to_owned())),
        }
    }

    /// Caregiver edit: overwrite content (and its embedding), optionally
    /// the base importance.
    ///
    /// Conflict policy is last-write-wins by timestamp: this stamps
    /// `updated_at` and flips the source to manual. A concurrent automatic
    /// extraction can only reinforce importance, never rewrite content, so
    /// a manual edit is never silently reverted.
    pub fn update_record(
        &self,
        id: &str,
        content: &str,
        embedding: &[f32],
        importance: Option<f32>,
    ) -> Result<(), MemoryStoreError> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(MemoryStoreError::Dimension {
                expected: EMBEDDING_DIM,
                got: embedding.len(),
            });
        }
        let normalized = l2_normalize(embedding);
        let blob = embedding_to_blob(&normalized);
        let content = truncate_content(content);
        let now = now_epoch_secs();
        let conn = self.lock()?;

        let tx = conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE memories SET content = ?1, embedding = ?2, updated_at = ?3, \
             source = 'manual' WHERE id = ?4",
            params![content, blob, now, id],
        )?;
        if rows == 0 {
            return Err(MemoryStoreError::NotFound(id.to_owned()));
        }
        if let Some(importance) = importance {
            tx.execute(
                "UPDATE memories SET importance = ?1 WHERE id = ?2",
                params![importance.clamp(0.0, 100.0), id],
            )?;
        }
        // vec0 rows are replaced, not updated in place.
        tx.execute(
            "DELETE FROM vec_memories WHERE memory_id = ?1",
            params![id],
        )?;
        tx.execute(
            "INSERT INTO vec_memories (memory_id, embedding) VALUES (?1, ?2)",
            params![id, blob],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Caregiver hard delete. The only path that removes a row outright.
    pub fn delete_record(&self, id: &str) -> Result<(), MemoryStoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let rows = tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(MemoryStoreError::NotFound(id.to_owned()));
        }
        tx.execute(
            "DELETE FROM vec_memories WHERE memory_id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Archive memories that are both stale and faded.
    ///
    /// A record is archived when it has gone `archive_after_days` without
    /// access (falling back to creation time if never accessed) and its
    /// effective importance is below the configured floor. Archived rows
    /// are excluded from retrieval but kept for audit. Returns the number
    /// of rows archived.
    pub fn archive_stale(&self) -> Result<usize, MemoryStoreError> {
        let now = now_epoch_secs();
        let stale_cutoff_secs = self.config.archive_after_days.saturating_mul(86_400);
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, subject_id, kind, content, importance, source, created_at, \
             updated_at, last_accessed_at, archived, metadata FROM memories \
             WHERE archived = 0",
        )?;
        let rows = stmt.query_map([], row_to_record)?;

        let mut to_archive = Vec::new();
        for row in rows {
            let record = row?;
            let last_touch = record.last_accessed_at.unwrap_or(record.created_at);
            if now.saturating_sub(last_touch) < stale_cutoff_secs {
                continue;
            }
            if effective_importance(&record, now) < self.config.archive_floor {
                to_archive.push(record.id);
            }
        }

        if !to_archive.is_empty() {
            let mut update =
                conn.prepare("UPDATE memories SET archived = 1, updated_at = ?1 WHERE id = ?2")?;
            for id in &to_archive {
                update.execute(params![now, id])?;
            }
            debug!(count = to_archive.len(), "archived stale memories");
        }

        Ok(to_archive.len())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, MemoryStoreError> {
        self.conn
            .lock()
            .map_err(|e| MemoryStoreError::Lock(e.to_string()))
    }

    /// ANN candidates for a subject, with exact cosine recomputed from the
    /// stored embedding blob. Archived rows and other subjects are dropped.
    fn candidate_hits(
        &self,
        conn: &Connection,
        subject_id: &str,
        query: &[f32],
        now: u64,
    ) -> Result<Vec<MemoryHit>, MemoryStoreError> {
        let blob = embedding_to_blob(query);
        let candidate_limit = (self.config.retrieval_limit * CANDIDATE_MULTIPLIER)
            .max(MIN_CANDIDATES) as i64;

        // KNN query: sqlite-vec requires the LIMIT directly on the vec
        // table query (JOINs don't pass LIMIT through).
        let mut stmt = conn.prepare(
            "SELECT memory_id FROM vec_memories WHERE embedding MATCH ?1 \
             ORDER BY distance LIMIT ?2",
        )?;
        let ids = stmt.query_map(params![blob, candidate_limit], |row| {
            row.get::<_, String>(0)
        })?;

        let mut fetch = conn.prepare(
            "SELECT id, subject_id, kind, content, importance, source, created_at, \
             updated_at, last_accessed_at, archived, metadata, embedding FROM memories \
             WHERE id = ?1 AND subject_id = ?2 AND archived = 0",
        )?;

        let mut hits = Vec::new();
        for id in ids {
            let id = id?;
            let row = fetch
                .query_map(params![id, subject_id], |row| {
                    let record = row_to_record(row)?;
                    let emb_blob: Vec<u8> = row.get(11)?;
                    Ok((record, emb_blob))
                })?
                .next();
            if let Some(row) = row {
                let (record, emb_blob) = row?;
                let embedding = blob_to_embedding(&emb_blob);
                let similarity = cosine_similarity(query, &embedding);
                let eff = effective_importance(&record, now);
                hits.push(MemoryHit {
                    record,
                    similarity,
                    effective_importance: eff,
                });
            }
        }
        Ok(hits)
    }

    /// Nearest active memory for a subject, as `(id, cosine similarity)`.
    fn nearest_for_subject(
        &self,
        conn: &Connection,
        subject_id: &str,
        embedding: &[f32],
    ) -> Result<Option<(String, f32)>, MemoryStoreError> {
        let hits = self.candidate_hits(conn, subject_id, embedding, now_epoch_secs())?;
        Ok(hits
            .into_iter()
            .max_by(|a, b| {
                a.similarity
                    .partial_cmp(&b.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|h| (h.record.id, h.similarity)))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the SQLite memory store.
#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
}

impl From<MemoryStoreError> for crate::error::CallError {
    fn from(e: MemoryStoreError) -> Self {
        Self::Memory(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Row / blob conversion helpers
// ---------------------------------------------------------------------------

pub(crate) fn embedding_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn blob_to_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let kind_str: String = row.get(2)?;
    let source_str: String = row.get(5)?;
    let archived: i64 = row.get(9)?;
    let metadata_str: Option<String> = row.get(10)?;

    Ok(MemoryRecord {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        kind: str_to_kind(&kind_str),
        content: row.get(3)?,
        importance: row.get(4)?,
        source: str_to_source(&source_str),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        last_accessed_at: row.get(8)?,
        archived: archived != 0,
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn kind_to_str(kind: MemoryKind) -> &'static str {
    display_kind(kind)
}

fn str_to_kind(s: &str) -> MemoryKind {
    match s {
        "fact" => MemoryKind::Fact,
        "preference" => MemoryKind::Preference,
        "event" => MemoryKind::Event,
        "concern" => MemoryKind::Concern,
        "relationship" => MemoryKind::Relationship,
        _ => MemoryKind::Fact, // safe fallback
    }
}

fn source_to_str(source: MemorySource) -> &'static str {
    match source {
        MemorySource::Extraction => "extraction",
        MemorySource::Manual => "manual",
    }
}

fn str_to_source(s: &str) -> MemorySource {
    match s {
        "manual" => MemorySource::Manual,
        _ => MemorySource::Extraction,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
