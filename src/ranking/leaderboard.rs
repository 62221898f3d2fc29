use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::HashMap;

/// A single subject's authoritative score, as produced by the analytical
/// store or the incremental update path.
#[derive(Debug, Clone, PartialEq)]
pub struct RankEntry {
    pub subject_id: String,
    pub score: f64,
}

/// Entry annotated with its 1-based rank, derived at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub subject_id: String,
    pub score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy)]
struct StoredEntry {
    score: f64,
    // Position in first-insertion order, the tie-breaker for equal scores.
    // An upsert that changes a score keeps the subject's original sequence.
    seq: u64,
}

// Scores are keyed by subject so upserts stay O(1); the descending-score
// order and the ranks are derived on every read, so they can never go stale
// relative to the scores. Reads cap at a top-N over a modest subject count,
// which keeps the derived sort cheap.
#[derive(Debug, Default)]
pub struct RankedSet {
    entries: HashMap<String, StoredEntry>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct RankedSnapshot {
    pub computed_at: DateTime<Utc>,
    pub entries: Vec<RankEntry>,
}

impl RankedSet {
    pub fn new() -> RankedSet {
        RankedSet {
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Insert `subject_id` or overwrite its previous score.
    pub fn upsert(&mut self, subject_id: &str, score: f64) -> EngineResult<()> {
        if score.is_nan() {
            return Err(EngineError::Validation(format!(
                "score for '{subject_id}' is NaN"
            )));
        }
        match self.entries.get_mut(subject_id) {
            Some(entry) => entry.score = score,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries
                    .insert(subject_id.to_string(), StoredEntry { score, seq });
            }
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Subjects in descending-score order, ties broken by insertion order.
    fn ranked(&self) -> Vec<(&String, &StoredEntry)> {
        self.entries
            .iter()
            .sorted_by(|a, b| b.1.score.total_cmp(&a.1.score).then(a.1.seq.cmp(&b.1.seq)))
            .collect()
    }

    /// First `min(n, size)` entries in descending-score order, each annotated
    /// with its 1-based position. Does not mutate state.
    pub fn top_n(&self, n: usize) -> Vec<RankedEntry> {
        self.ranked()
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(idx, (subject_id, entry))| RankedEntry {
                subject_id: subject_id.clone(),
                score: entry.score,
                rank: idx + 1,
            })
            .collect()
    }

    /// Position `subject_id` currently occupies, consistent with `top_n`
    /// ordering at call time.
    pub fn rank_of(&self, subject_id: &str) -> Option<RankedEntry> {
        self.ranked()
            .into_iter()
            .enumerate()
            .find(|(_, (candidate, _))| candidate.as_str() == subject_id)
            .map(|(idx, (subject_id, entry))| RankedEntry {
                subject_id: subject_id.clone(),
                score: entry.score,
                rank: idx + 1,
            })
    }

    pub fn score_of(&self, subject_id: &str) -> Option<f64> {
        self.entries.get(subject_id).map(|e| e.score)
    }

    /// Swap the entire backing content for a new full snapshot. The snapshot
    /// is validated and deduplicated (last occurrence of a subject wins the
    /// score, first occurrence the position) before the swap, so a bad
    /// snapshot leaves the previous ranking untouched.
    pub fn replace_all(&mut self, entries: Vec<RankEntry>) -> EngineResult<()> {
        let mut replacement = RankedSet::new();
        for entry in entries {
            replacement.upsert(&entry.subject_id, entry.score)?;
        }
        self.entries = replacement.entries;
        self.next_seq = replacement.next_seq;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_seq = 0;
    }
}

impl RankedSnapshot {
    pub fn new() -> RankedSnapshot {
        RankedSnapshot {
            computed_at: Utc::now(),
            entries: Vec::new(),
        }
    }
}
