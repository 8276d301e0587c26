//! Outbound call scheduling and retry.
//!
//! Runs outside the live-call hot path: the runner ticks on an interval,
//! places due calls through a [`CallLauncher`], and retries failures with
//! bounded exponential backoff.

pub mod runner;
pub mod tasks;

pub use runner::{CallLauncher, CallScheduler, SchedulerSnapshot};
pub use tasks::{CallAttemptResult, CallTaskStatus, OutboundCall};
