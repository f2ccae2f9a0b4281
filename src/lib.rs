#![forbid(unsafe_code)]

//! # rankwise
//!
//! Rank a list by answering "which is more important?" for a short
//! sequence of pairs, instead of ordering N items by hand.
//!
//! The core is a bottom-up merge sort whose comparator is a person. Every
//! answer lands in a symmetric `ComparisonCache` (optionally extended by
//! transitive inference), and the whole sort is a plain `SessionState`
//! value: persist it after any answer and resume exactly where you left
//! off, even in another process.
//!
//! The engine does no I/O. `SessionKeeper` wires it to a `BlobStore`
//! (SQLite or in-memory), a `DecisionSource` and an optional JSONL trace.

pub mod cache;
pub mod config;
pub mod decision;
pub mod engine;
pub mod session;
pub mod store;
pub mod trace;
pub mod types;

pub use cache::{CacheRecord, ComparisonCache, PairKeyError};
pub use config::{load_config_from_path, ConfigError, EngineConfig, TiePolicy};
pub use decision::{Decision, DecisionError, DecisionSource, FnDecisionSource, LineDecisionSource};
pub use engine::{
    estimate_comparisons, validate_state_value, EngineError, MergeEngine, MergeFrame,
    SessionState, Strategy,
};
pub use session::{RunOutcome, SessionError, SessionKeeper, StoredSession};
pub use store::{BlobStore, MemoryBlobStore, SqliteBlobStore, StoreError};
pub use trace::{DecisionTrace, JsonlTraceSink, TraceError, TraceSink};
pub use types::{ComparisonResult, ItemId, NextPair, Progress};
