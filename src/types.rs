//! Shared value types for the ranking engine.

use serde::{Deserialize, Serialize};

/// Opaque item identifier, totally ordered by its string representation.
pub type ItemId = String;

/// Judgement for an ordered pair `(first, second)`.
///
/// `Greater` means the first item is the more important one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonResult {
    Less,
    Equal,
    Greater,
}

impl ComparisonResult {
    /// Same judgement seen from the other side of the pair.
    pub fn inverse(self) -> Self {
        match self {
            Self::Less => Self::Greater,
            Self::Equal => Self::Equal,
            Self::Greater => Self::Less,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Less => "less",
            Self::Equal => "equal",
            Self::Greater => "greater",
        }
    }
}

impl From<std::cmp::Ordering> for ComparisonResult {
    fn from(ordering: std::cmp::Ordering) -> Self {
        match ordering {
            std::cmp::Ordering::Less => Self::Less,
            std::cmp::Ordering::Equal => Self::Equal,
            std::cmp::Ordering::Greater => Self::Greater,
        }
    }
}

/// What the engine needs next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextPair {
    /// A person has to decide `a` vs `b`.
    Compare { a: ItemId, b: ItemId },
    /// Sorting has finished; `finalize` returns the ranking.
    Done,
}

/// Progress for display purposes. `estimated_total` is not a hard bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub asked: usize,
    pub estimated_total: usize,
    /// 0..=100, clamped when `asked` overshoots the estimate.
    pub percentage: u8,
}

impl Progress {
    pub fn new(asked: usize, estimated_total: usize) -> Self {
        let percentage = if estimated_total == 0 {
            100
        } else {
            let raw = (100.0 * asked as f64 / estimated_total as f64).round();
            raw.min(100.0) as u8
        };
        Self {
            asked,
            estimated_total,
            percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_flips_only_strict_results() {
        assert_eq!(ComparisonResult::Greater.inverse(), ComparisonResult::Less);
        assert_eq!(ComparisonResult::Less.inverse(), ComparisonResult::Greater);
        assert_eq!(ComparisonResult::Equal.inverse(), ComparisonResult::Equal);
    }

    #[test]
    fn progress_clamps_and_rounds() {
        assert_eq!(Progress::new(1, 3).percentage, 33);
        assert_eq!(Progress::new(2, 3).percentage, 67);
        assert_eq!(Progress::new(9, 5).percentage, 100);
        assert_eq!(Progress::new(0, 0).percentage, 100);
    }

    #[test]
    fn result_serializes_as_lowercase_word() {
        let json = serde_json::to_string(&ComparisonResult::Greater).unwrap();
        assert_eq!(json, "\"greater\"");
    }
}
