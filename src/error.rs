//! Error types for the lark call orchestration core.

/// Top-level error type for the call orchestration system.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Memory store error (SQLite, schema, ranking).
    #[error("memory error: {0}")]
    Memory(String),

    /// Embedding generation error.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Guidance analysis error.
    #[error("guidance error: {0}")]
    Guidance(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Session lifecycle error.
    #[error("session error: {0}")]
    Session(String),

    /// Scheduler error (task execution, state persistence).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Status surface error.
    #[error("status error: {0}")]
    Status(String),

    /// Guarded external call error.
    #[error("guard error: {0}")]
    Guard(#[from] lark_guard::GuardError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CallError>;
