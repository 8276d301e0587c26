//! SQLite DDL definitions for the lark memory store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Complete DDL for the lark memory database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode for concurrent reads during writes.
PRAGMA journal_mode = WAL;

-- Schema version tracking.
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Long-term memories — mirrors MemoryRecord fields, plus the raw embedding
-- blob used for exact cosine recomputation on retrieval candidates.
CREATE TABLE IF NOT EXISTS memories (
    id               TEXT PRIMARY KEY,
    subject_id       TEXT NOT NULL,
    kind             TEXT NOT NULL,      -- snake_case MemoryKind variant
    content          TEXT NOT NULL,
    importance       REAL NOT NULL DEFAULT 50.0,
    source           TEXT NOT NULL DEFAULT 'extraction',
    created_at       INTEGER NOT NULL DEFAULT 0,
    updated_at       INTEGER NOT NULL DEFAULT 0,
    last_accessed_at INTEGER,
    archived         INTEGER NOT NULL DEFAULT 0,
    embedding        BLOB NOT NULL,      -- f32 little-endian, EMBEDDING_DIM entries
    metadata         TEXT                -- JSON blob
);

-- Indexes for common query patterns.
CREATE INDEX IF NOT EXISTS idx_memories_subject  ON memories(subject_id);
CREATE INDEX IF NOT EXISTS idx_memories_kind     ON memories(kind);
CREATE INDEX IF NOT EXISTS idx_memories_archived ON memories(archived);

"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times — all statements use `IF NOT EXISTS`.
/// Inserts the current schema version into `schema_meta` if not already
/// present.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Seed schema version if this is a fresh database.
    let version_str = super::types::CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// DDL for the `vec_memories` virtual table (requires sqlite-vec loaded).
const VEC_MEMORIES_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_memories USING vec0(
    memory_id TEXT PRIMARY KEY,
    embedding FLOAT[1536]
);
"#;

/// Create the `vec_memories` virtual table.
///
/// Must be called **after** sqlite-vec has been registered on the
/// connection. Safe to call multiple times (`IF NOT EXISTS`).
pub(crate) fn apply_vec_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(VEC_MEMORIES_SQL)
}

/// Read the current schema version from the database.
///
/// Returns `None` if the `schema_meta` table is empty or the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
