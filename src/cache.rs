//! Symmetric memoization of pairwise judgements.
//!
//! Every judgement is stored once, under the canonical orientation
//! `(smaller id, larger id)`. Queries in the other orientation get the
//! inverted result, so callers never see the storage orientation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ComparisonResult, ItemId};

/// Persisted form of a cache: canonical pair key -> result.
pub type CacheRecord = BTreeMap<String, ComparisonResult>;

const KEY_SEPARATOR: char = '|';
const KEY_ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairKeyError {
    #[error("pair key has no separator: {0:?}")]
    MissingSeparator(String),
    #[error("pair key has more than one separator: {0:?}")]
    ExtraSeparator(String),
    #[error("pair key ends with a dangling escape: {0:?}")]
    DanglingEscape(String),
    #[error("pair key compares an item with itself: {0:?}")]
    SelfPair(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CacheRecord", into = "CacheRecord")]
pub struct ComparisonCache {
    // lower id -> higher id -> result oriented as "lower vs higher"
    entries: BTreeMap<ItemId, BTreeMap<ItemId, ComparisonResult>>,
}

impl ComparisonCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result oriented as "a vs b".
    pub fn get(&self, a: &str, b: &str) -> Option<ComparisonResult> {
        if a == b {
            return None;
        }
        let (lo, hi, flipped) = canonical(a, b);
        let stored = *self.entries.get(lo)?.get(hi)?;
        Some(if flipped { stored.inverse() } else { stored })
    }

    /// Record "a vs b". Overwrites any earlier answer for the pair.
    pub fn set(&mut self, a: &str, b: &str, result: ComparisonResult) {
        if a == b {
            tracing::warn!(item = a, "ignoring comparison of an item with itself");
            return;
        }
        let (lo, hi, flipped) = canonical(a, b);
        let stored = if flipped { result.inverse() } else { result };
        self.entries
            .entry(lo.to_string())
            .or_default()
            .insert(hi.to_string(), stored);
    }

    pub fn has(&self, a: &str, b: &str) -> bool {
        self.get(a, b).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// Canonical entries `(lower, higher, result)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, ComparisonResult)> + '_ {
        self.entries.iter().flat_map(|(lo, row)| {
            row.iter()
                .map(move |(hi, result)| (lo.as_str(), hi.as_str(), *result))
        })
    }

    pub fn to_record(&self) -> CacheRecord {
        self.iter()
            .map(|(lo, hi, result)| (encode_pair_key(lo, hi), result))
            .collect()
    }

    pub fn from_record(record: &CacheRecord) -> Result<Self, PairKeyError> {
        let mut cache = Self::new();
        for (key, result) in record {
            let (a, b) = decode_pair_key(key)?;
            if a == b {
                return Err(PairKeyError::SelfPair(key.clone()));
            }
            cache.set(&a, &b, *result);
        }
        Ok(cache)
    }

    /// Replace the whole contents with `record`. On error the cache is left
    /// unchanged.
    pub fn import_record(&mut self, record: &CacheRecord) -> Result<(), PairKeyError> {
        *self = Self::from_record(record)?;
        Ok(())
    }

    /// Insert every "greater than" relation implied by chains of cached
    /// strict results among `items`. Returns the number of inserted pairs.
    ///
    /// Existing entries are never touched, so a direct answer always beats
    /// an inference. Cost is cubic in `items.len()`; callers gate it by size.
    /// Contradictory answers are not an error: when a cycle lets a pair be
    /// inferred both ways, the first orientation inserted wins.
    pub fn apply_transitive_closure(&mut self, items: &[ItemId]) -> usize {
        let mut ids: Vec<&str> = items.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        let n = ids.len();
        if n < 3 {
            return 0;
        }

        // greater[i * n + j] <=> ids[i] is judged more important than ids[j]
        let mut greater = vec![false; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                match self.get(ids[i], ids[j]) {
                    Some(ComparisonResult::Greater) => greater[i * n + j] = true,
                    Some(ComparisonResult::Less) => greater[j * n + i] = true,
                    _ => {}
                }
            }
        }

        for k in 0..n {
            for i in 0..n {
                if i == k || !greater[i * n + k] {
                    continue;
                }
                for j in 0..n {
                    if greater[k * n + j] {
                        greater[i * n + j] = true;
                    }
                }
            }
        }

        let mut inferred = 0;
        for i in 0..n {
            for j in 0..n {
                if i == j || !greater[i * n + j] || self.has(ids[i], ids[j]) {
                    continue;
                }
                self.set(ids[i], ids[j], ComparisonResult::Greater);
                inferred += 1;
            }
        }
        inferred
    }
}

impl TryFrom<CacheRecord> for ComparisonCache {
    type Error = PairKeyError;

    fn try_from(record: CacheRecord) -> Result<Self, Self::Error> {
        Self::from_record(&record)
    }
}

impl From<ComparisonCache> for CacheRecord {
    fn from(cache: ComparisonCache) -> Self {
        cache.to_record()
    }
}

fn canonical<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str, bool) {
    if a <= b {
        (a, b, false)
    } else {
        (b, a, true)
    }
}

/// Build the record key for a pair, canonical order first.
pub fn encode_pair_key(a: &str, b: &str) -> String {
    let (lo, hi, _) = canonical(a, b);
    let mut key = String::with_capacity(lo.len() + hi.len() + 1);
    push_escaped(&mut key, lo);
    key.push(KEY_SEPARATOR);
    push_escaped(&mut key, hi);
    key
}

/// Split a record key back into its two ids, in the order they appear.
pub fn decode_pair_key(key: &str) -> Result<(ItemId, ItemId), PairKeyError> {
    let mut first: Option<String> = None;
    let mut current = String::new();
    let mut escaped = false;
    for c in key.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == KEY_ESCAPE {
            escaped = true;
        } else if c == KEY_SEPARATOR {
            if first.is_some() {
                return Err(PairKeyError::ExtraSeparator(key.to_string()));
            }
            first = Some(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        return Err(PairKeyError::DanglingEscape(key.to_string()));
    }
    match first {
        Some(first) => Ok((first, current)),
        None => Err(PairKeyError::MissingSeparator(key.to_string())),
    }
}

fn push_escaped(out: &mut String, id: &str) {
    for c in id.chars() {
        if c == KEY_SEPARATOR || c == KEY_ESCAPE {
            out.push(KEY_ESCAPE);
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_canonical() {
        assert_eq!(encode_pair_key("b", "a"), "a|b");
        assert_eq!(encode_pair_key("a", "b"), "a|b");
    }

    #[test]
    fn pair_key_escapes_separator_and_escape() {
        let key = encode_pair_key("x|y", "z\\w");
        assert_eq!(key, "x\\|y|z\\\\w");
        let (a, b) = decode_pair_key(&key).unwrap();
        assert_eq!(a, "x|y");
        assert_eq!(b, "z\\w");
    }

    #[test]
    fn malformed_pair_keys_are_rejected() {
        assert!(matches!(
            decode_pair_key("ab"),
            Err(PairKeyError::MissingSeparator(_))
        ));
        assert!(matches!(
            decode_pair_key("a|b|c"),
            Err(PairKeyError::ExtraSeparator(_))
        ));
        assert!(matches!(
            decode_pair_key("a|b\\"),
            Err(PairKeyError::DanglingEscape(_))
        ));
    }

    #[test]
    fn self_pair_in_record_is_rejected() {
        let mut record = CacheRecord::new();
        record.insert("a|a".to_string(), ComparisonResult::Equal);
        assert!(matches!(
            ComparisonCache::from_record(&record),
            Err(PairKeyError::SelfPair(_))
        ));
    }

    #[test]
    fn non_canonical_record_key_is_normalized() {
        let mut record = CacheRecord::new();
        record.insert("b|a".to_string(), ComparisonResult::Greater);
        let cache = ComparisonCache::from_record(&record).unwrap();
        assert_eq!(cache.get("b", "a"), Some(ComparisonResult::Greater));
        assert_eq!(cache.get("a", "b"), Some(ComparisonResult::Less));
        assert!(cache.to_record().contains_key("a|b"));
    }

    #[test]
    fn failed_import_keeps_previous_contents() {
        let mut cache = ComparisonCache::new();
        cache.set("a", "b", ComparisonResult::Greater);
        let mut bad = CacheRecord::new();
        bad.insert("nope".to_string(), ComparisonResult::Less);
        assert!(cache.import_record(&bad).is_err());
        assert_eq!(cache.get("a", "b"), Some(ComparisonResult::Greater));
    }
}
