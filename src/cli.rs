use clap::Parser;
use serde::Serialize;

fn is_false(b: &bool) -> bool {
    !b
}

#[derive(Debug, Parser, Serialize)]
pub struct Cli {
    /// Whether to precompute every leaderboard combination at startup
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub warm_on_start: bool,
}
