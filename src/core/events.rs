use chrono::{DateTime, Utc};
use std::fmt;

use crate::ranking::key::LeaderboardKey;
use crate::ranking::leaderboard::RankedEntry;
use crate::utils::format_rank;

// Monitoring notifications emitted by the refresh paths. Consumed by the
// logging loop in main; a messaging integration would subscribe to the same
// channel.
#[derive(Debug)]
pub enum Event {
    LeaderboardRefreshed(LeaderboardKey, usize, DateTime<Utc>),
    RefreshFailed(LeaderboardKey, String),
    NewLeader(LeaderboardKey, RankedEntry),
    LeaderboardsWarmed(usize, usize),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Event::LeaderboardRefreshed(key, entries, computed_at) => {
                write!(
                    f,
                    "Leaderboard {} refreshed with {} entries (snapshot computed at {})",
                    key,
                    entries,
                    computed_at.format("%d/%m/%Y %H:%M:%S")
                )
            }
            Event::RefreshFailed(key, reason) => {
                write!(f, "Refresh failed for leaderboard {}. {}", key, reason)
            }
            Event::NewLeader(key, leader) => {
                write!(
                    f,
                    "Agent {} takes {} on leaderboard {} with a score of {:.2}",
                    leader.subject_id,
                    format_rank(leader.rank),
                    key,
                    leader.score
                )
            }
            Event::LeaderboardsWarmed(refreshed, failed) => match failed {
                0 => write!(f, "Warm-up complete, {} leaderboards refreshed", refreshed),
                _ => write!(
                    f,
                    "Warm-up complete, {} leaderboards refreshed, {} failed",
                    refreshed, failed
                ),
            },
        }
    }
}
