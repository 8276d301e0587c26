//! Lark: conversational call orchestration with long-term memory.
//!
//! This crate is the real-time core behind agent-assisted companion calls:
//!
//! Transcribed utterance → signal extraction → turn orchestration → response context
//!
//! # Architecture
//!
//! Each turn is prepared by independent pieces wired together by the
//! orchestrator:
//! - **Signals**: sub-millisecond keyword classification of the utterance,
//!   including the goodbye grace gate and safety escalation
//! - **Guidance**: asynchronous advisory analysis, always one turn stale,
//!   cached in a per-session latest-wins slot
//! - **Memory**: SQLite + sqlite-vec store with importance decay,
//!   deduplication, and tiered retrieval
//! - **Phase**: forward-only call phase machine with time-budget forcing
//! - **Guard** (`lark-guard`): circuit breakers and timeouts around every
//!   external call
//! - **Scheduler**: outbound call placement with bounded backoff retries,
//!   outside the live-call hot path

pub mod config;
pub mod context;
pub mod error;
pub mod extraction;
pub mod guidance;
pub mod memory;
pub mod orchestrator;
pub mod phase;
pub mod scheduler;
pub mod session;
pub mod signals;
pub mod status;

pub use config::LarkConfig;
pub use context::ResponseContext;
pub use error::{CallError, Result};
pub use guidance::{GuidanceAnalyzer, GuidanceResult, GuidanceSlot, HttpGuidanceAnalyzer};
pub use memory::{Embedder, HttpEmbedder, MemoryStore};
pub use orchestrator::TurnOrchestrator;
pub use phase::CallPhase;
pub use session::{CallSession, SessionRegistry};
pub use signals::{classify, SignalSet};
