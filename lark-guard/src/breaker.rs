//! Per-service circuit breaker.
//!
//! Tracks success/failure counts per external service and temporarily blocks
//! services that fail repeatedly. After a cooldown period, a tripped service
//! enters a half-open state where a single probe request determines whether
//! to restore or re-trip the circuit.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  cooldown   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └────────┘             └────┬─────┘
//!     │                         ▲                      │
//!     │  success                │  failure              │
//!     └─────────────────────────┴──────────────────────┘
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Circuit breaker state for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Service is healthy — all requests are allowed through.
    Closed,
    /// Service has failed too many times — requests are blocked until cooldown expires.
    Open,
    /// Cooldown has elapsed — one probe request is allowed to test recovery.
    HalfOpen,
}

/// Health tracking data for a single service.
#[derive(Debug, Clone)]
struct ServiceHealth {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before tripping the circuit to Open.
    pub failure_threshold: u32,
    /// Seconds to wait in Open state before transitioning to HalfOpen.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

/// Point-in-time health entry reported on the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthSnapshot {
    /// Service name (e.g. `"guidance"`, `"embedding"`).
    pub service: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
}

/// Per-service circuit breaker state.
///
/// Each external dependency has independent health tracking. When a service
/// accumulates enough consecutive failures it is temporarily blocked (Open
/// state). After a cooldown period, one probe request is allowed (HalfOpen).
/// Success restores the service; failure re-trips the circuit.
#[derive(Debug)]
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    services: HashMap<String, ServiceHealth>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            services: HashMap::new(),
        }
    }

    fn record_success(&mut self, service: &str) {
        let health = self.services.entry(service.to_owned()).or_default();
        health.state = CircuitState::Closed;
        health.consecutive_failures = 0;
        health.last_success_at = Some(Instant::now());
    }

    fn record_failure(&mut self, service: &str) {
        let health = self.services.entry(service.to_owned()).or_default();
        health.consecutive_failures += 1;
        health.last_failure_at = Some(Instant::now());

        if health.consecutive_failures >= self.config.failure_threshold {
            if health.state != CircuitState::Open {
                tracing::warn!(
                    service,
                    failures = health.consecutive_failures,
                    "circuit tripped open"
                );
            }
            health.state = CircuitState::Open;
        }
    }

    fn should_attempt(&mut self, service: &str) -> bool {
        let cooldown_secs = self.config.cooldown_secs;
        let health = self.services.entry(service.to_owned()).or_default();

        match health.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooldown_elapsed = health
                    .last_failure_at
                    .is_none_or(|t| t.elapsed().as_secs() >= cooldown_secs);

                if cooldown_elapsed {
                    health.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn service_status(&self, service: &str) -> CircuitState {
        self.services
            .get(service)
            .map_or(CircuitState::Closed, |h| h.state)
    }

    fn health_report(&self) -> Vec<ServiceHealthSnapshot> {
        let mut report: Vec<ServiceHealthSnapshot> = self
            .services
            .iter()
            .map(|(service, health)| ServiceHealthSnapshot {
                service: service.clone(),
                state: health.state,
                consecutive_failures: health.consecutive_failures,
            })
            .collect();
        report.sort_by(|a, b| a.service.cmp(&b.service));
        report
    }

    fn reset(&mut self) {
        self.services.clear();
    }
}

/// Shared, process-wide handle to the circuit breaker map.
///
/// Created once at process start and cloned into every component that makes
/// external calls. All sessions share the same breaker state per service, so
/// a dependency that is down for one call is down for all of them.
#[derive(Debug, Clone)]
pub struct GuardHandle {
    inner: Arc<Mutex<CircuitBreaker>>,
}

impl GuardHandle {
    /// Create a handle with the given breaker configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CircuitBreaker::new(config))),
        }
    }

    /// Check whether a request to the given service should be attempted.
    ///
    /// - [`CircuitState::Closed`]: always returns `true`
    /// - [`CircuitState::Open`]: returns `true` only if the cooldown has
    ///   elapsed (transitions to [`CircuitState::HalfOpen`])
    /// - [`CircuitState::HalfOpen`]: returns `true` (one probe allowed)
    pub fn should_attempt(&self, service: &str) -> bool {
        self.lock().should_attempt(service)
    }

    /// Record a successful request for the given service.
    ///
    /// Resets the consecutive failure count and transitions the service to
    /// [`CircuitState::Closed`] regardless of previous state.
    pub fn record_success(&self, service: &str) {
        self.lock().record_success(service);
    }

    /// Record a failed request for the given service.
    ///
    /// Increments the consecutive failure count. At the configured threshold
    /// the circuit transitions to [`CircuitState::Open`].
    pub fn record_failure(&self, service: &str) {
        self.lock().record_failure(service);
    }

    /// Get the current circuit state for a specific service.
    pub fn service_status(&self, service: &str) -> CircuitState {
        self.lock().service_status(service)
    }

    /// Get a health report for all tracked services, sorted by name.
    pub fn health_report(&self) -> Vec<ServiceHealthSnapshot> {
        self.lock().health_report()
    }

    /// Reset all service states to healthy (Closed with zero failures).
    pub fn reset(&self) {
        self.lock().reset();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for GuardHandle {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUIDANCE: &str = "guidance";
    const EMBEDDING: &str = "embedding";

    fn make_handle(threshold: u32, cooldown_secs: u64) -> GuardHandle {
        GuardHandle::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
        })
    }

    #[test]
    fn initial_state_is_closed() {
        let guard = make_handle(3, 60);
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Closed);
        assert_eq!(guard.service_status(EMBEDDING), CircuitState::Closed);
    }

    #[test]
    fn stays_closed_below_threshold() {
        let guard = make_handle(3, 60);
        guard.record_failure(GUIDANCE);
        guard.record_failure(GUIDANCE);
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Closed);
    }

    #[test]
    fn trips_to_open_at_threshold() {
        let guard = make_handle(3, 60);
        guard.record_failure(GUIDANCE);
        guard.record_failure(GUIDANCE);
        guard.record_failure(GUIDANCE);
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Open);
    }

    #[test]
    fn open_blocks_attempts() {
        let guard = make_handle(3, 600); // Long cooldown
        for _ in 0..3 {
            guard.record_failure(EMBEDDING);
        }
        assert!(!guard.should_attempt(EMBEDDING));
    }

    #[test]
    fn open_transitions_to_half_open_after_cooldown() {
        let guard = make_handle(3, 0); // Zero cooldown = immediate
        for _ in 0..3 {
            guard.record_failure(GUIDANCE);
        }
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Open);

        // With zero cooldown, should_attempt transitions to HalfOpen
        assert!(guard.should_attempt(GUIDANCE));
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_restores_closed() {
        let guard = make_handle(3, 0);
        for _ in 0..3 {
            guard.record_failure(GUIDANCE);
        }
        let _ = guard.should_attempt(GUIDANCE); // → HalfOpen
        guard.record_success(GUIDANCE);
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_retrips() {
        let guard = make_handle(1, 0); // threshold=1 for simplicity
        guard.record_failure(EMBEDDING); // → Open
        let _ = guard.should_attempt(EMBEDDING); // → HalfOpen
        guard.record_failure(EMBEDDING); // → Open again
        assert_eq!(guard.service_status(EMBEDDING), CircuitState::Open);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let guard = make_handle(5, 60);
        guard.record_failure(GUIDANCE);
        guard.record_failure(GUIDANCE);
        guard.record_success(GUIDANCE);

        let report = guard.health_report();
        let entry = report
            .iter()
            .find(|s| s.service == GUIDANCE)
            .expect("guidance tracked");
        assert_eq!(entry.consecutive_failures, 0);
        assert_eq!(entry.state, CircuitState::Closed);
    }

    #[test]
    fn services_are_independent() {
        let guard = make_handle(2, 60);
        guard.record_failure(GUIDANCE);
        guard.record_failure(GUIDANCE);
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Open);
        // Other services unaffected
        assert_eq!(guard.service_status(EMBEDDING), CircuitState::Closed);
        assert!(guard.should_attempt(EMBEDDING));
    }

    #[test]
    fn health_report_includes_tracked_services() {
        let guard = make_handle(3, 60);
        guard.record_failure(GUIDANCE);
        guard.record_success(EMBEDDING);

        let report = guard.health_report();
        assert_eq!(report.len(), 2);
        // Sorted by name: embedding before guidance.
        assert_eq!(report[0].service, EMBEDDING);
        assert_eq!(report[0].consecutive_failures, 0);
        assert_eq!(report[1].service, GUIDANCE);
        assert_eq!(report[1].consecutive_failures, 1);
    }

    #[test]
    fn reset_clears_all_state() {
        let guard = make_handle(3, 60);
        for _ in 0..3 {
            guard.record_failure(GUIDANCE);
        }
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Open);

        guard.reset();
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Closed);
        assert!(guard.health_report().is_empty());
    }

    #[test]
    fn rapid_success_failure_alternation() {
        let guard = make_handle(3, 60);
        // Alternate success/failure — never trips because consecutive failures reset.
        for _ in 0..10 {
            guard.record_failure(GUIDANCE);
            guard.record_success(GUIDANCE);
        }
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Closed);
    }

    #[test]
    fn cloned_handles_share_state() {
        let guard = make_handle(2, 60);
        let clone = guard.clone();
        clone.record_failure(GUIDANCE);
        clone.record_failure(GUIDANCE);
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Open);
    }

    #[test]
    fn concurrent_failures_trip_circuit() {
        let guard = make_handle(10, 60);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let g = guard.clone();
            handles.push(std::thread::spawn(move || g.record_failure(GUIDANCE)));
        }
        for h in handles {
            h.join().expect("thread join");
        }
        assert_eq!(guard.service_status(GUIDANCE), CircuitState::Open);
    }
}
