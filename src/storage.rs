use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ranking::key::LeaderboardKey;
use crate::ranking::leaderboard::RankedSet;

type SharedRankedSet = Arc<Mutex<RankedSet>>;

// One slot per leaderboard key. Slots are created lazily on first write and
// never removed; the key space is a small finite product of enums.
#[derive(Clone)]
pub struct MemoryCache {
    boards: Arc<Mutex<HashMap<LeaderboardKey, SharedRankedSet>>>,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache {
            boards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Slot for `key`, created empty on first access.
    pub fn board(&self, key: &LeaderboardKey) -> SharedRankedSet {
        let mut boards = self.boards.lock().unwrap();
        boards
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(RankedSet::new())))
            .clone()
    }

    /// Slot for `key` if one was ever created. `None` distinguishes "no
    /// leaderboard for this key" from "subject absent from an existing
    /// leaderboard".
    pub fn lookup(&self, key: &LeaderboardKey) -> Option<SharedRankedSet> {
        self.boards.lock().unwrap().get(key).cloned()
    }

    pub fn size(&self, key: &LeaderboardKey) -> usize {
        match self.lookup(key) {
            Some(board) => board.lock().unwrap().size(),
            None => 0,
        }
    }
}
