use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ranking::key::LeaderboardKey;

// Per-key refresh bookkeeping. `in_flight` is the single-flight gate: all
// writes to it go through the tracker lock, so the test-and-set in
// `mark_refreshing` is atomic across concurrent readers.
#[derive(Debug, Clone, Copy)]
struct FreshnessRecord {
    last_full_refresh: DateTime<Utc>,
    in_flight: bool,
}

impl Default for FreshnessRecord {
    fn default() -> FreshnessRecord {
        FreshnessRecord {
            // Epoch zero: a record that was never refreshed reads as
            // infinitely stale.
            last_full_refresh: DateTime::<Utc>::default(),
            in_flight: false,
        }
    }
}

#[derive(Clone)]
pub struct FreshnessTracker {
    records: Arc<Mutex<HashMap<LeaderboardKey, FreshnessRecord>>>,
}

impl FreshnessTracker {
    pub fn new() -> FreshnessTracker {
        FreshnessTracker {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// True iff `key` completed a full refresh less than `max_age` ago.
    pub fn is_fresh(&self, key: &LeaderboardKey, max_age: Duration) -> bool {
        let records = self.records.lock().unwrap();
        match records.get(key) {
            Some(record) => Utc::now() - record.last_full_refresh < max_age,
            None => false,
        }
    }

    /// Test-and-set on the in-flight flag. Returns true iff this call won
    /// the race and is now responsible for the recompute.
    pub fn mark_refreshing(&self, key: &LeaderboardKey) -> bool {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(*key).or_default();
        match record.in_flight {
            true => false,
            false => {
                record.in_flight = true;
                true
            }
        }
    }

    pub fn mark_refreshed(&self, key: &LeaderboardKey, at: DateTime<Utc>) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(*key).or_default();
        record.last_full_refresh = at;
        record.in_flight = false;
    }

    /// Clears the in-flight flag without touching the refresh timestamp, so
    /// the next stale read retries.
    pub fn mark_refresh_failed(&self, key: &LeaderboardKey) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(*key).or_default();
        record.in_flight = false;
    }

    pub fn is_refreshing(&self, key: &LeaderboardKey) -> bool {
        let records = self.records.lock().unwrap();
        records.get(key).map(|r| r.in_flight).unwrap_or_default()
    }

    pub fn last_refreshed_at(&self, key: &LeaderboardKey) -> Option<DateTime<Utc>> {
        let records = self.records.lock().unwrap();
        records.get(key).map(|r| r.last_full_refresh)
    }
}
