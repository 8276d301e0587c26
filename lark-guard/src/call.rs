//! Guarded execution of external calls.
//!
//! [`guarded_call`] is the single choke point every external request goes
//! through: circuit check, hard timeout, breaker bookkeeping. Callers treat
//! the returned [`GuardError`] as a degradation signal, not a fatal fault.

use crate::backoff::Backoff;
use crate::breaker::GuardHandle;
use crate::error::GuardError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `fut` under the named service's circuit breaker with a hard timeout.
///
/// - If the circuit is open, fails fast with [`GuardError::CircuitOpen`]
///   without polling the future.
/// - A timeout or service error records a failure on the breaker.
/// - A success closes the circuit (and resets the failure count).
///
/// # Errors
///
/// Returns [`GuardError::CircuitOpen`], [`GuardError::Timeout`], or
/// [`GuardError::Failed`] accordingly.
pub async fn guarded_call<T, E, F>(
    guard: &GuardHandle,
    service: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, GuardError>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    if !guard.should_attempt(service) {
        debug!(service, "circuit open, skipping call");
        return Err(GuardError::CircuitOpen {
            service: service.to_owned(),
        });
    }

    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => {
            guard.record_success(service);
            Ok(value)
        }
        Ok(Err(e)) => {
            guard.record_failure(service);
            Err(GuardError::Failed {
                service: service.to_owned(),
                message: e.to_string(),
            })
        }
        Err(_elapsed) => {
            guard.record_failure(service);
            Err(GuardError::Timeout {
                service: service.to_owned(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

/// Run a fallible operation up to `max_attempts` times under the guard,
/// sleeping a backoff delay between attempts.
///
/// Intended for paths **outside** a live call (e.g. scheduled work); the
/// turn hot path never retries inline, it degrades instead. An open circuit
/// aborts the loop immediately — retrying against an open breaker would just
/// burn the probe budget.
///
/// # Errors
///
/// Returns the fail-fast [`GuardError::CircuitOpen`] unchanged, or
/// [`GuardError::Exhausted`] once every attempt has failed.
pub async fn retry_guarded<T, E, F, Fut>(
    guard: &GuardHandle,
    service: &str,
    timeout: Duration,
    backoff: &Backoff,
    max_attempts: u32,
    mut op: F,
) -> Result<T, GuardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = max_attempts.max(1);
    let mut last_message = String::new();

    for attempt in 0..attempts {
        match guarded_call(guard, service, timeout, op()).await {
            Ok(value) => return Ok(value),
            Err(e @ GuardError::CircuitOpen { .. }) => return Err(e),
            Err(e) => {
                last_message = e.to_string();
                debug!(service, attempt, error = %e, "guarded attempt failed");
            }
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(backoff.jittered_delay(attempt)).await;
        }
    }

    Err(GuardError::Exhausted {
        service: service.to_owned(),
        attempts,
        message: last_message,
    })
}
