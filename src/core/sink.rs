use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, EngineResult};
use crate::ranking::key::LeaderboardKey;
use crate::storage::MemoryCache;

// Subject ids as minted by the account service: uuid-ish, no whitespace.
static REGEX_SUBJECT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

// Write-side entry point for incremental score updates. Bypasses the
// coordinator on purpose: a single-subject update does not make the whole
// ranking current, so the freshness bookkeeping is left untouched.
#[derive(Clone)]
pub struct ScoreUpdateSink {
    cache: MemoryCache,
}

impl ScoreUpdateSink {
    pub fn new(cache: MemoryCache) -> ScoreUpdateSink {
        ScoreUpdateSink { cache }
    }

    /// Upsert one subject's score into the key's leaderboard. The entry is
    /// visible to rank and top-N reads immediately.
    pub fn apply(&self, key: &LeaderboardKey, subject_id: &str, score: f64) -> EngineResult<()> {
        if !REGEX_SUBJECT_ID.is_match(subject_id) {
            return Err(EngineError::Validation(format!(
                "invalid subject id '{subject_id}'"
            )));
        }
        if score.is_nan() {
            return Err(EngineError::Validation(format!(
                "score for '{subject_id}' is NaN"
            )));
        }

        let board = self.cache.board(key);
        let mut data = board.lock().unwrap();
        data.upsert(subject_id, score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::freshness::FreshnessTracker;
    use crate::ranking::key::{Metric, Mode, Period};
    use chrono::Utc;

    fn key() -> LeaderboardKey {
        LeaderboardKey::new(Mode::Paper, Metric::TotalPnl, Period::Days7)
    }

    #[test]
    fn apply_makes_the_subject_visible_immediately() {
        let cache = MemoryCache::new();
        let sink = ScoreUpdateSink::new(cache.clone());

        sink.apply(&key(), "agent-a", 120.5).unwrap();
        sink.apply(&key(), "agent-b", 80.0).unwrap();

        assert_eq!(cache.size(&key()), 2);
        let board = cache.lookup(&key()).unwrap();
        let entry = board.lock().unwrap().rank_of("agent-a").unwrap();
        assert_eq!(entry.rank, 1);
        assert_eq!(entry.score, 120.5);
    }

    #[test]
    fn apply_does_not_touch_the_freshness_record() {
        let cache = MemoryCache::new();
        let freshness = FreshnessTracker::new();
        let sink = ScoreUpdateSink::new(cache.clone());

        let refreshed_at = Utc::now();
        freshness.mark_refreshed(&key(), refreshed_at);

        let before = cache.size(&key());
        sink.apply(&key(), "agent-new", 1.0).unwrap();

        assert_eq!(cache.size(&key()), before + 1);
        assert_eq!(freshness.last_refreshed_at(&key()), Some(refreshed_at));
        assert!(!freshness.is_refreshing(&key()));
    }

    #[test]
    fn invalid_inputs_are_rejected_before_the_cache_is_touched() {
        let cache = MemoryCache::new();
        let sink = ScoreUpdateSink::new(cache.clone());

        assert!(matches!(
            sink.apply(&key(), "not a subject id", 1.0),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            sink.apply(&key(), "", 1.0),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            sink.apply(&key(), "agent-a", f64::NAN),
            Err(EngineError::Validation(_))
        ));
        // rejected before the board slot is even created
        assert!(cache.lookup(&key()).is_none());
    }
}
