//! Error types for guarded calls.

/// Failure modes of a guarded external call.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The circuit for this service is open — the call was not attempted.
    #[error("circuit open for {service}, failing fast")]
    CircuitOpen {
        /// Service whose circuit is open.
        service: String,
    },

    /// The call did not complete within the configured timeout.
    #[error("{service} call timed out after {timeout_ms} ms")]
    Timeout {
        /// Service that timed out.
        service: String,
        /// Timeout that was applied, in milliseconds.
        timeout_ms: u64,
    },

    /// The call completed with an error from the service itself.
    #[error("{service} call failed: {message}")]
    Failed {
        /// Service that failed.
        service: String,
        /// Underlying error description.
        message: String,
    },

    /// All retry attempts were consumed without a success.
    #[error("{service} retries exhausted after {attempts} attempts: {message}")]
    Exhausted {
        /// Service that kept failing.
        service: String,
        /// Number of attempts made.
        attempts: u32,
        /// Description of the final failure.
        message: String,
    },
}

impl GuardError {
    /// Returns `true` if the call never reached the service (open circuit).
    #[must_use]
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
