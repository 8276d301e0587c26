//! # lark-guard
//!
//! Resilience primitives shared by every external call lark makes:
//! embedding generation, guidance analysis, and auxiliary lookups.
//!
//! ## Design
//!
//! - One circuit breaker per named service, tracked in a single
//!   [`GuardHandle`] that is created at process start and passed explicitly
//!   into the components that need it — there is no ambient global.
//! - [`guarded_call`] wraps any future with a hard timeout and breaker
//!   bookkeeping; when a circuit is open it fails fast without touching the
//!   network.
//! - [`Backoff`] computes bounded, jittered exponential delays for the
//!   outbound-call scheduler.
//!
//! A failed or blocked call surfaces as a [`GuardError`] that the caller is
//! expected to absorb (fall back to cached data, reschedule, log) — nothing
//! in this crate panics or aborts a caller.

pub mod backoff;
pub mod breaker;
pub mod call;
pub mod error;

pub use backoff::Backoff;
pub use breaker::{CircuitBreakerConfig, CircuitState, GuardHandle, ServiceHealthSnapshot};
pub use call::{guarded_call, retry_guarded};
pub use error::GuardError;
