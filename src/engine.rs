//! Resumable bottom-up merge sort with a human comparator.
//!
//! The engine is stateless: every call takes the caller's `SessionState`
//! by `&mut` and leaves it ready to be persisted. Sorting advances only
//! through `next_pair` (which consumes every cached answer it can) and
//! `commit` (which feeds one new answer in).
//!
//! ```rust
//! use rankwise::{ComparisonResult, MergeEngine, NextPair};
//!
//! let engine = MergeEngine::default();
//! let mut state = engine.create_session(["A", "B", "C"], None);
//! while let NextPair::Compare { a, b } = engine.next_pair(&mut state) {
//!     // Alphabetically earlier ids win in this example.
//!     let answer = ComparisonResult::from(b.cmp(&a));
//!     engine.commit(&mut state, &a, &b, answer).unwrap();
//! }
//! assert_eq!(engine.finalize(&state), vec!["A", "B", "C"]);
//! ```

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::ComparisonCache;
use crate::config::{EngineConfig, TiePolicy};
use crate::types::{ComparisonResult, ItemId, NextPair, Progress};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no comparison is pending: no merge is in progress")]
    NoActiveMerge,
    #[error("pending pair is ({expected_a}, {expected_b}), got ({got_a}, {got_b})")]
    UnexpectedPair {
        expected_a: ItemId,
        expected_b: ItemId,
        got_a: ItemId,
        got_b: ItemId,
    },
    /// The pair is the current merge heads, but `next_pair` never asked it
    /// because the answer is already known.
    #[error("({a}, {b}) is already answered; request the next pair instead")]
    PairNotPending { a: ItemId, b: ItemId },
    #[error("malformed session state: {0}")]
    MalformedState(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Merge,
}

/// One in-progress merge of two already-ordered runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFrame {
    pub left: Vec<ItemId>,
    pub right: Vec<ItemId>,
    pub left_cursor: usize,
    pub right_cursor: usize,
    pub output: Vec<ItemId>,
}

impl MergeFrame {
    fn new(left: Vec<ItemId>, right: Vec<ItemId>) -> Self {
        let capacity = left.len() + right.len();
        Self {
            left,
            right,
            left_cursor: 0,
            right_cursor: 0,
            output: Vec::with_capacity(capacity),
        }
    }

    /// Heads of both runs, or `None` once either side is exhausted.
    pub fn pending_pair(&self) -> Option<(&ItemId, &ItemId)> {
        Some((
            self.left.get(self.left_cursor)?,
            self.right.get(self.right_cursor)?,
        ))
    }

    /// Emit one head according to `verdict` (left head vs right head).
    fn take(&mut self, verdict: ComparisonResult, tie_policy: TiePolicy) {
        let take_left = match verdict {
            ComparisonResult::Greater => true,
            ComparisonResult::Less => false,
            ComparisonResult::Equal => tie_policy == TiePolicy::LeftFirst,
        };
        if take_left {
            if let Some(item) = self.left.get(self.left_cursor) {
                self.output.push(item.clone());
                self.left_cursor += 1;
            }
        } else if let Some(item) = self.right.get(self.right_cursor) {
            self.output.push(item.clone());
            self.right_cursor += 1;
        }
    }

    /// Drain whatever remains on either side, no questions asked.
    fn into_merged(self) -> Vec<ItemId> {
        let Self {
            left,
            right,
            left_cursor,
            right_cursor,
            mut output,
        } = self;
        output.extend(left.into_iter().skip(left_cursor));
        output.extend(right.into_iter().skip(right_cursor));
        output
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.left_cursor > self.left.len() || self.right_cursor > self.right.len() {
            return Err(EngineError::MalformedState(format!(
                "merge cursor out of range: left {}/{}, right {}/{}",
                self.left_cursor,
                self.left.len(),
                self.right_cursor,
                self.right.len()
            )));
        }
        if self.output.len() != self.left_cursor + self.right_cursor {
            return Err(EngineError::MalformedState(format!(
                "merge output has {} items but cursors consumed {}",
                self.output.len(),
                self.left_cursor + self.right_cursor
            )));
        }
        let mut consumed = self.left[..self.left_cursor]
            .iter()
            .chain(&self.right[..self.right_cursor]);
        let emitted: HashSet<&ItemId> = self.output.iter().collect();
        if consumed.any(|id| !emitted.contains(id)) {
            return Err(EngineError::MalformedState(
                "merge output does not match consumed items".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full resumable state of one ranking run. Plain data: serialize it
/// between any two engine calls and feed the exact value back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub strategy: Strategy,
    /// Comparisons actually answered by a person.
    pub asked: usize,
    /// Display-only estimate of the total number of questions.
    pub estimated_total: usize,
    pub cache: ComparisonCache,
    /// Unmerged runs, merged pairwise from the front.
    pub runs: VecDeque<Vec<ItemId>>,
    /// Active merges; at most one for the sequential bottom-up merge.
    pub stack: Vec<MergeFrame>,
    /// Final order, filled in once sorting completes.
    pub result: Vec<ItemId>,
}

impl SessionState {
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty() && self.runs.len() <= 1
    }

    /// Every item taking part in this session, sorted.
    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self
            .runs
            .iter()
            .flatten()
            .chain(
                self.stack
                    .iter()
                    .flat_map(|frame| frame.left.iter().chain(&frame.right)),
            )
            .cloned()
            .collect();
        if ids.is_empty() {
            ids = self.result.clone();
        }
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn item_count(&self) -> usize {
        self.item_ids().len()
    }

    /// Stable hash of the session's item set, independent of input order.
    pub fn fingerprint(&self) -> String {
        item_set_fingerprint(self.item_ids())
    }

    /// Check the structural invariants the engine relies on.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.stack.len() > 1 {
            return Err(EngineError::MalformedState(format!(
                "merge stack depth {} exceeds 1",
                self.stack.len()
            )));
        }
        for frame in &self.stack {
            frame.validate()?;
        }

        let mut seen = HashSet::new();
        let placed = self
            .runs
            .iter()
            .flatten()
            .chain(self.stack.iter().flat_map(|f| f.left.iter().chain(&f.right)));
        for id in placed {
            if !seen.insert(id) {
                return Err(EngineError::MalformedState(format!(
                    "item {id:?} appears more than once"
                )));
            }
        }

        if !self.result.is_empty() {
            let matches_run = self.stack.is_empty()
                && self.runs.len() == 1
                && self.runs.front() == Some(&self.result);
            if !matches_run {
                return Err(EngineError::MalformedState(
                    "result is set but sorting has not completed".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate persisted state. Anything that fails here must
    /// not be resumed.
    pub fn from_json(raw: &[u8]) -> Result<Self, EngineError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| EngineError::MalformedState(format!("invalid json: {e}")))?;
        validate_state_value(&value)?;
        let state: SessionState = serde_json::from_value(value)
            .map_err(|e| EngineError::MalformedState(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }
}

/// Shape check on an untyped state value: runs, stack and result must be
/// present and hold arrays of the right kind.
pub fn validate_state_value(value: &Value) -> Result<(), EngineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("state is not an object"))?;

    let runs = array_field(obj, "runs")?;
    for run in runs {
        let run = run
            .as_array()
            .ok_or_else(|| malformed("runs must contain arrays"))?;
        require_ids(run, "runs")?;
    }

    let stack = array_field(obj, "stack")?;
    for frame in stack {
        let frame = frame
            .as_object()
            .ok_or_else(|| malformed("stack must contain objects"))?;
        for key in ["left", "right", "output"] {
            require_ids(array_field(frame, key)?, key)?;
        }
        for key in ["left_cursor", "right_cursor"] {
            if !frame.get(key).is_some_and(Value::is_u64) {
                return Err(malformed(&format!("{key} must be a non-negative integer")));
            }
        }
    }

    require_ids(array_field(obj, "result")?, "result")?;

    if !obj.get("cache").is_some_and(Value::is_object) {
        return Err(malformed("cache must be an object"));
    }
    Ok(())
}

fn array_field<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a Vec<Value>, EngineError> {
    obj.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(&format!("missing or non-array field {key:?}")))
}

fn require_ids(values: &[Value], field: &str) -> Result<(), EngineError> {
    if values.iter().all(Value::is_string) {
        Ok(())
    } else {
        Err(malformed(&format!("{field} must contain only string ids")))
    }
}

fn malformed(message: &str) -> EngineError {
    EngineError::MalformedState(message.to_string())
}

/// `ceil(n * log2(n))` for n > 1, else 0.
pub fn estimate_comparisons(n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let n = n as f64;
    (n * n.log2()).ceil() as usize
}

/// blake3 over the sorted, de-duplicated ids.
pub fn item_set_fingerprint<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    ids.sort();
    ids.dedup();
    let mut hasher = blake3::Hasher::new();
    for id in &ids {
        hasher.update(&(id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    config: EngineConfig,
}

impl MergeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a session with one singleton run per item, in input order.
    /// A prior cache seeds the session so answered pairs are never re-asked.
    pub fn create_session<I, S>(&self, items: I, existing_cache: Option<ComparisonCache>) -> SessionState
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        let mut seen = HashSet::new();
        let mut runs = VecDeque::new();
        for item in items {
            let item: ItemId = item.into();
            if seen.insert(item.clone()) {
                runs.push_back(vec![item]);
            } else {
                warn!(item = %item, "dropping duplicate item id");
            }
        }
        let n = runs.len();
        debug!(items = n, seeded = existing_cache.is_some(), "created ranking session");
        SessionState {
            strategy: Strategy::Merge,
            asked: 0,
            estimated_total: estimate_comparisons(n),
            cache: existing_cache.unwrap_or_default(),
            runs,
            stack: Vec::new(),
            result: Vec::new(),
        }
    }

    /// Advance until a person has to decide something, or sorting is done.
    /// Cached answers are consumed here without returning control.
    pub fn next_pair(&self, state: &mut SessionState) -> NextPair {
        loop {
            if let Some(frame) = state.stack.last_mut() {
                if let Some((a, b)) = frame.pending_pair() {
                    match state.cache.get(a, b) {
                        Some(verdict) => {
                            frame.take(verdict, self.config.tie_policy);
                            continue;
                        }
                        None => {
                            return NextPair::Compare {
                                a: a.clone(),
                                b: b.clone(),
                            };
                        }
                    }
                }
                if let Some(done) = state.stack.pop() {
                    let merged = done.into_merged();
                    debug!(len = merged.len(), "merge finished");
                    state.runs.push_back(merged);
                }
                continue;
            }

            if state.runs.len() >= 2 {
                if let (Some(left), Some(right)) = (state.runs.pop_front(), state.runs.pop_front()) {
                    debug!(left = left.len(), right = right.len(), "merge started");
                    state.stack.push(MergeFrame::new(left, right));
                }
                continue;
            }

            state.result = state.runs.front().cloned().unwrap_or_default();
            return NextPair::Done;
        }
    }

    /// Record a person's answer for the pending pair and advance the merge.
    ///
    /// Only the pair last returned by `next_pair` is accepted, in either
    /// orientation. Returns the number of pairs newly inferred by transitive
    /// closure. On error nothing changes.
    pub fn commit(
        &self,
        state: &mut SessionState,
        a: &str,
        b: &str,
        result: ComparisonResult,
    ) -> Result<usize, EngineError> {
        let frame = state.stack.last_mut().ok_or(EngineError::NoActiveMerge)?;
        let (left, right) = frame.pending_pair().ok_or(EngineError::NoActiveMerge)?;
        let verdict = if a == left.as_str() && b == right.as_str() {
            result
        } else if a == right.as_str() && b == left.as_str() {
            result.inverse()
        } else {
            return Err(EngineError::UnexpectedPair {
                expected_a: left.clone(),
                expected_b: right.clone(),
                got_a: a.to_string(),
                got_b: b.to_string(),
            });
        };
        if state.cache.has(left, right) {
            return Err(EngineError::PairNotPending {
                a: left.clone(),
                b: right.clone(),
            });
        }

        frame.take(verdict, self.config.tie_policy);
        state.cache.set(a, b, result);
        state.asked += 1;

        let items = state.item_ids();
        if !self.config.closure_enabled_for(items.len()) {
            return Ok(0);
        }
        let inferred = state.cache.apply_transitive_closure(&items);
        if inferred > 0 {
            debug!(inferred, "transitive closure added comparisons");
        }
        Ok(inferred)
    }

    /// Ranked ids, most important first. Before completion this is whatever
    /// is available (possibly empty).
    pub fn finalize(&self, state: &SessionState) -> Vec<ItemId> {
        if !state.result.is_empty() {
            return state.result.clone();
        }
        if state.is_complete() {
            return state.runs.front().cloned().unwrap_or_default();
        }
        Vec::new()
    }

    pub fn progress(&self, state: &SessionState) -> Progress {
        Progress::new(state.asked, state.estimated_total)
    }

    pub fn is_complete(&self, state: &SessionState) -> bool {
        state.is_complete()
    }

    /// Restart over `items` keeping every answer learned so far.
    pub fn reset_with_cache<I, S>(&self, state: SessionState, items: I) -> SessionState
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        self.create_session(items, Some(state.cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_n_log_n() {
        assert_eq!(estimate_comparisons(0), 0);
        assert_eq!(estimate_comparisons(1), 0);
        assert_eq!(estimate_comparisons(2), 2);
        assert_eq!(estimate_comparisons(3), 5);
        assert_eq!(estimate_comparisons(8), 24);
    }

    #[test]
    fn frame_drains_remaining_side_without_questions() {
        let mut frame = MergeFrame::new(vec!["a".into()], vec!["b".into(), "c".into()]);
        frame.take(ComparisonResult::Greater, TiePolicy::LeftFirst);
        assert!(frame.pending_pair().is_none());
        assert_eq!(frame.into_merged(), vec!["a", "b", "c"]);
    }

    #[test]
    fn equal_follows_tie_policy() {
        let mut left_first = MergeFrame::new(vec!["x".into()], vec!["y".into()]);
        left_first.take(ComparisonResult::Equal, TiePolicy::LeftFirst);
        assert_eq!(left_first.output, vec!["x"]);

        let mut right_first = MergeFrame::new(vec!["x".into()], vec!["y".into()]);
        right_first.take(ComparisonResult::Equal, TiePolicy::RightFirst);
        assert_eq!(right_first.output, vec!["y"]);
    }

    #[test]
    fn fingerprint_ignores_order_and_duplicates() {
        assert_eq!(
            item_set_fingerprint(["b", "a", "a"]),
            item_set_fingerprint(["a", "b"])
        );
        assert_ne!(item_set_fingerprint(["ab"]), item_set_fingerprint(["a", "b"]));
    }
}
