//! Persistence-aware driver around the merge engine.
//!
//! `SessionKeeper` is the application-shell lifecycle object: build it with
//! `new`, drive sessions with `run`, and call `shutdown` to flush traces.
//! One keeper per store; callers must not run two sessions for the same
//! list concurrently.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::ComparisonCache;
use crate::decision::{Decision, DecisionError, DecisionSource};
use crate::engine::{item_set_fingerprint, EngineError, MergeEngine, SessionState};
use crate::store::{BlobStore, StoreError};
use crate::trace::{now_epoch_ms, DecisionTrace, JsonlTraceSink, TraceError, TraceSink};
use crate::types::{ItemId, NextPair, Progress};

pub const SESSION_KEY_PREFIX: &str = "rankwise:session:";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("decision error: {0}")]
    Decision(#[from] DecisionError),
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// What the store holds for a list.
#[derive(Debug)]
pub enum StoredSession {
    Missing,
    Valid(SessionState),
    /// Unusable state. The cache is kept when that part alone still parses.
    Malformed {
        error: EngineError,
        salvaged_cache: Option<ComparisonCache>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(Vec<ItemId>),
    Paused(Progress),
}

pub struct SessionKeeper<S> {
    store: S,
    engine: MergeEngine,
    trace: Option<Arc<dyn TraceSink>>,
}

impl<S: BlobStore> SessionKeeper<S> {
    pub fn new(store: S, engine: MergeEngine) -> Self {
        Self {
            store,
            engine,
            trace: None,
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Append decision traces to a JSONL file.
    pub fn with_jsonl_trace(
        mut self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, TraceError> {
        self.trace = Some(Arc::new(JsonlTraceSink::open(path)?));
        Ok(self)
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session_key(list_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{list_id}")
    }

    pub async fn load(&self, list_id: &str) -> Result<StoredSession, SessionError> {
        let Some(raw) = self.store.get(&Self::session_key(list_id)).await? else {
            return Ok(StoredSession::Missing);
        };
        match SessionState::from_json(&raw) {
            Ok(state) => Ok(StoredSession::Valid(state)),
            Err(error) => {
                let salvaged_cache = salvage_cache(&raw);
                warn!(
                    list_id,
                    error = %error,
                    salvaged = salvaged_cache.is_some(),
                    "stored session is malformed; it will not be resumed"
                );
                Ok(StoredSession::Malformed {
                    error,
                    salvaged_cache,
                })
            }
        }
    }

    pub async fn save(&self, list_id: &str, state: &SessionState) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec(state)?;
        self.store.set(&Self::session_key(list_id), &bytes).await?;
        Ok(())
    }

    pub async fn discard(&self, list_id: &str) -> Result<(), SessionError> {
        self.store.delete(&Self::session_key(list_id)).await?;
        Ok(())
    }

    /// Ids of every stored list.
    pub async fn list_ids(&self) -> Result<Vec<String>, SessionError> {
        let keys = self.store.keys(SESSION_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(SESSION_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Resume the stored session when it ranks the same item set; otherwise
    /// start over, keeping every answer that can still be read.
    pub async fn resume_or_start(
        &self,
        list_id: &str,
        items: &[ItemId],
    ) -> Result<SessionState, SessionError> {
        let state = match self.load(list_id).await? {
            StoredSession::Valid(state) if state.fingerprint() == item_set_fingerprint(items) => {
                info!(list_id, asked = state.asked, "resuming ranking session");
                return Ok(state);
            }
            StoredSession::Valid(state) => {
                info!(
                    list_id,
                    known = state.cache.len(),
                    "item set changed; restarting with learned answers"
                );
                self.engine.reset_with_cache(state, items.iter().cloned())
            }
            StoredSession::Malformed { salvaged_cache, .. } => {
                self.engine.create_session(items.iter().cloned(), salvaged_cache)
            }
            StoredSession::Missing => {
                info!(list_id, items = items.len(), "starting ranking session");
                self.engine.create_session(items.iter().cloned(), None)
            }
        };
        self.save(list_id, &state).await?;
        Ok(state)
    }

    /// Start over on `items`. With `keep_cache`, previous answers are reused.
    pub async fn reset(
        &self,
        list_id: &str,
        items: &[ItemId],
        keep_cache: bool,
    ) -> Result<SessionState, SessionError> {
        let cache = match self.load(list_id).await? {
            StoredSession::Valid(state) => Some(state.cache),
            StoredSession::Malformed { salvaged_cache, .. } => salvaged_cache,
            StoredSession::Missing => None,
        };
        let cache = if keep_cache { cache } else { None };
        let state = self.engine.create_session(items.iter().cloned(), cache);
        self.save(list_id, &state).await?;
        Ok(state)
    }

    /// Ask questions until the ranking is complete or the source pauses.
    /// State is persisted after every answer.
    pub async fn run(
        &self,
        list_id: &str,
        state: &mut SessionState,
        source: &dyn DecisionSource,
    ) -> Result<RunOutcome, SessionError> {
        loop {
            let (a, b) = match self.engine.next_pair(state) {
                NextPair::Compare { a, b } => (a, b),
                NextPair::Done => {
                    self.save(list_id, state).await?;
                    let order = self.engine.finalize(state);
                    info!(list_id, asked = state.asked, "ranking complete");
                    return Ok(RunOutcome::Completed(order));
                }
            };

            let progress = self.engine.progress(state);
            let result = match source.decide(&a, &b, progress).await? {
                Decision::Answer(result) => result,
                Decision::Pause => {
                    self.save(list_id, state).await?;
                    info!(list_id, asked = state.asked, "ranking paused");
                    return Ok(RunOutcome::Paused(progress));
                }
            };

            let inferred = self.engine.commit(state, &a, &b, result)?;
            self.save(list_id, state).await?;

            if let Some(sink) = &self.trace {
                let event = DecisionTrace {
                    timestamp_ms: now_epoch_ms(),
                    list_id: list_id.to_string(),
                    comparison_index: state.asked,
                    item_a: a,
                    item_b: b,
                    result,
                    inferred,
                    item_set_hash: state.fingerprint(),
                };
                if let Err(err) = sink.record(event) {
                    warn!(error = %err, "failed to record decision trace");
                }
            }
        }
    }

    /// Close the trace sink, flushing every recorded answer.
    pub fn shutdown(self) -> Result<(), TraceError> {
        match &self.trace {
            Some(sink) => sink.close(),
            None => Ok(()),
        }
    }
}

fn salvage_cache(raw: &[u8]) -> Option<ComparisonCache> {
    let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
    let cache = value.get("cache")?.clone();
    serde_json::from_value(cache).ok()
}
