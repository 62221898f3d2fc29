pub mod key;
pub mod leaderboard;
