use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::ranking::key::LeaderboardKey;
use crate::ranking::leaderboard::{RankEntry, RankedSnapshot};

/// The sole interface to the analytical system of record: given a leaderboard
/// key, produce a complete ranked snapshot. Implementations must be safe to
/// call concurrently for different keys; the coordinator guarantees at most
/// one outstanding call per key.
#[async_trait]
pub trait SourceComputer: Send + Sync {
    async fn compute(&self, key: &LeaderboardKey) -> EngineResult<RankedSnapshot>;
}

enum Endpoint<'a> {
    Rankings(&'a LeaderboardKey),
}

impl fmt::Display for Endpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::Rankings(key) => {
                write!(f, "/v1/rankings/{}/{}/{}", key.mode, key.metric, key.period)
            }
        }
    }
}

pub struct AnalyticsClient {
    http_client: Client,
    base_url: String,
    api_token: String,
}

impl AnalyticsClient {
    pub fn new(base_url: String, timeout: std::time::Duration, api_token: String) -> Self {
        let http_client = Client::builder().timeout(timeout).build().unwrap();
        Self {
            http_client,
            base_url,
            api_token,
        }
    }

    async fn get(&self, endpoint: &Endpoint<'_>) -> EngineResult<String> {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self
            .http_client
            .get(&url)
            .header("authorization", format!("Bearer {}", self.api_token))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => response.text().await.map_err(|_| EngineError::Parse),
            // The warehouse responds with SERVICE_UNAVAILABLE while the ranking
            // materialization for the requested key is still running.
            StatusCode::SERVICE_UNAVAILABLE => Err(EngineError::Source(format!(
                "{}. The ranking query is not ready to serve.",
                StatusCode::SERVICE_UNAVAILABLE
            ))),
            _ => Err(EngineError::Http(format!("{}", response.status()))),
        }
    }

    fn parse_rankings(payload: &str) -> EngineResult<Vec<RankEntry>> {
        // Response from the analytics ranking endpoint.
        // Defined here as it is only used by this function.
        use serde::Deserialize;

        #[derive(Debug, Deserialize)]
        struct RankingsResponse {
            entries: Vec<RankingsRow>,
        }

        #[derive(Debug, Deserialize)]
        struct RankingsRow {
            agent_id: String,
            score: f64,
        }

        let parsed =
            serde_json::from_str::<RankingsResponse>(payload).map_err(|_| EngineError::Parse)?;

        let entries = parsed
            .entries
            .into_iter()
            .map(|row| RankEntry {
                subject_id: row.agent_id,
                score: row.score,
            })
            .collect();

        Ok(entries)
    }
}

#[async_trait]
impl SourceComputer for AnalyticsClient {
    async fn compute(&self, key: &LeaderboardKey) -> EngineResult<RankedSnapshot> {
        let endpoint = Endpoint::Rankings(key);
        let payload = self.get(&endpoint).await?;
        let entries = AnalyticsClient::parse_rankings(&payload)?;
        Ok(RankedSnapshot {
            computed_at: Utc::now(),
            entries,
        })
    }
}
