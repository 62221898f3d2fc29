use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::time;
use tracing::{error, info, warn};

use crate::client::analytics::SourceComputer;
use crate::config::SETTINGS;
use crate::core::events::Event;
use crate::core::freshness::FreshnessTracker;
use crate::error::{EngineError, EngineResult};
use crate::ranking::key::LeaderboardKey;
use crate::ranking::leaderboard::RankedEntry;
use crate::storage::MemoryCache;

// Interval at which a request that lost the synchronous single-flight race
// re-checks whether the winning recompute has settled.
const INFLIGHT_POLL_MILLIS: u64 = 25;

/// How a read result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Served from cache within the fresh window, no source call.
    FreshHit,
    /// Served stale from cache; a background recompute is running.
    StaleHitRefreshing,
    /// No usable cached data; the recompute ran on the request path.
    MissSynchronous,
    /// The synchronous recompute failed and no cached fallback exists.
    SourceFailureFallback,
}

#[derive(Debug)]
pub struct LeaderboardView {
    pub provenance: Provenance,
    pub entries: Vec<RankedEntry>,
}

/// The read contract handed to the request-handling layer.
#[derive(Debug)]
pub struct RankingResponse {
    pub provenance: Provenance,
    pub entries: Vec<RankedEntry>,
    pub error: Option<EngineError>,
}

/// Three-way result of a rank point-lookup.
#[derive(Debug, PartialEq)]
pub enum RankLookup {
    Ranked(RankedEntry),
    /// The leaderboard exists but the subject is not on it.
    UnknownSubject,
    /// No leaderboard was ever computed for the key.
    UnknownLeaderboard,
}

/// Freshness thresholds and the source-call budget.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Staleness threshold before a read triggers a background refresh.
    pub fresh_window: Duration,
    /// Absolute expiry after which an entry is a miss, not a stale hit.
    pub entry_ttl: Duration,
    pub source_timeout: std::time::Duration,
}

impl RefreshPolicy {
    pub fn from_settings() -> RefreshPolicy {
        RefreshPolicy {
            fresh_window: Duration::seconds(SETTINGS.fresh_window_seconds as i64),
            entry_ttl: Duration::seconds(SETTINGS.cache_entry_ttl_seconds as i64),
            source_timeout: std::time::Duration::from_millis(SETTINGS.source_compute_timeout_millis),
        }
    }
}

struct RefreshOutcome {
    computed_at: chrono::DateTime<Utc>,
    entries: usize,
    previous_leader: Option<RankedEntry>,
    new_leader: Option<RankedEntry>,
}

/// Decides, per leaderboard key, whether to serve cached data, serve stale
/// data while a background recompute runs, or fall through to a synchronous
/// recompute. Sole owner of the freshness records; guarantees at most one
/// concurrent source call per key.
#[derive(Clone)]
pub struct RefreshCoordinator {
    cache: MemoryCache,
    freshness: FreshnessTracker,
    source: Arc<dyn SourceComputer>,
    sender: Arc<Sender<Event>>,
    policy: RefreshPolicy,
}

impl RefreshCoordinator {
    pub fn new(
        cache: MemoryCache,
        freshness: FreshnessTracker,
        source: Arc<dyn SourceComputer>,
        sender: Arc<Sender<Event>>,
        policy: RefreshPolicy,
    ) -> RefreshCoordinator {
        RefreshCoordinator {
            cache,
            freshness,
            source,
            sender,
            policy,
        }
    }

    /// Top `limit` entries for `key`, tagged with how they were produced.
    /// Never blocks on a recompute once any usable cached data exists.
    pub async fn get(
        &self,
        key: &LeaderboardKey,
        limit: usize,
    ) -> EngineResult<LeaderboardView> {
        let size = self.cache.size(key);

        if size > 0 && self.freshness.is_fresh(key, self.policy.fresh_window) {
            return Ok(LeaderboardView {
                provenance: Provenance::FreshHit,
                entries: self.top_n(key, limit),
            });
        }

        // Beyond the absolute TTL the cached entries are not served anymore,
        // even as a stale fallback.
        let expired = !self.freshness.is_fresh(key, self.policy.entry_ttl);

        if size > 0 && !expired {
            if self.freshness.mark_refreshing(key) {
                self.spawn_background_refresh(*key);
            }
            // A refresh is either already running or was just started by this
            // call; the stale data is served either way.
            return Ok(LeaderboardView {
                provenance: Provenance::StaleHitRefreshing,
                entries: self.top_n(key, limit),
            });
        }

        self.recompute_synchronous(key).await?;
        Ok(LeaderboardView {
            provenance: Provenance::MissSynchronous,
            entries: self.top_n(key, limit),
        })
    }

    /// `get` folded into the external read contract: a hard synchronous
    /// failure becomes a SOURCE_FAILURE_FALLBACK response carrying the error.
    pub async fn serve(&self, key: &LeaderboardKey, limit: usize) -> RankingResponse {
        match self.get(key, limit).await {
            Ok(view) => RankingResponse {
                provenance: view.provenance,
                entries: view.entries,
                error: None,
            },
            Err(e) => RankingResponse {
                provenance: Provenance::SourceFailureFallback,
                entries: Vec::new(),
                error: Some(e),
            },
        }
    }

    /// Current rank and score of a single subject. Reads the in-memory state
    /// as-is: possibly stale, never blocking, no freshness check.
    pub fn rank_of(&self, key: &LeaderboardKey, subject_id: &str) -> RankLookup {
        match self.cache.lookup(key) {
            None => RankLookup::UnknownLeaderboard,
            Some(board) => {
                let data = board.lock().unwrap();
                match data.rank_of(subject_id) {
                    Some(entry) => RankLookup::Ranked(entry),
                    None => RankLookup::UnknownSubject,
                }
            }
        }
    }

    /// Force a recompute for `key` through the single-flight gate. Used by
    /// the warm-up and periodic refresh jobs; a no-op when a recompute is
    /// already in flight.
    pub async fn refresh(&self, key: &LeaderboardKey) -> EngineResult<()> {
        match self.freshness.mark_refreshing(key) {
            true => self.recompute(key).await,
            false => Ok(()),
        }
    }

    fn top_n(&self, key: &LeaderboardKey, limit: usize) -> Vec<RankedEntry> {
        match self.cache.lookup(key) {
            Some(board) => board.lock().unwrap().top_n(limit),
            None => Vec::new(),
        }
    }

    fn spawn_background_refresh(&self, key: LeaderboardKey) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            // Failures are recorded and swallowed: the stale data already
            // served stays valid until the next read retries.
            if let Err(e) = coordinator.recompute(&key).await {
                error!("Background refresh for leaderboard {key} failed. {e}");
            }
        });
    }

    // Synchronous path: still goes through the gate so that at most one
    // source call per key is outstanding. Losers of the race wait for the
    // winner's recompute to settle and then serve the replaced snapshot.
    async fn recompute_synchronous(&self, key: &LeaderboardKey) -> EngineResult<()> {
        if self.freshness.mark_refreshing(key) {
            return self.recompute(key).await;
        }

        info!("Recompute for leaderboard {key} already in flight, waiting for it to settle.");
        self.wait_for_inflight(key).await?;

        match self.cache.size(key) > 0 && self.freshness.is_fresh(key, self.policy.entry_ttl) {
            true => Ok(()),
            false => Err(EngineError::Source(format!(
                "recompute for leaderboard {key} failed in a concurrent request"
            ))),
        }
    }

    async fn wait_for_inflight(&self, key: &LeaderboardKey) -> EngineResult<()> {
        // The winner's source call is bounded by the client timeout, so twice
        // that budget is enough for it to settle one way or the other.
        let budget = self.policy.source_timeout * 2;
        let settled = time::timeout(budget, async {
            let mut interval = time::interval(std::time::Duration::from_millis(
                INFLIGHT_POLL_MILLIS,
            ));
            loop {
                interval.tick().await;
                if !self.freshness.is_refreshing(key) {
                    break;
                }
            }
        })
        .await;

        settled.map_err(|_| {
            EngineError::Source(format!(
                "timed out waiting for the in-flight recompute of leaderboard {key}"
            ))
        })
    }

    // Recompute procedure. The caller must have won the single-flight gate;
    // this function always releases it, through mark_refreshed on success or
    // mark_refresh_failed on failure.
    async fn recompute(&self, key: &LeaderboardKey) -> EngineResult<()> {
        match self.try_recompute(key).await {
            Ok(outcome) => {
                self.freshness.mark_refreshed(key, Utc::now());
                self.emit(Event::LeaderboardRefreshed(
                    *key,
                    outcome.entries,
                    outcome.computed_at,
                ))
                .await;

                if let Some(leader) = outcome.new_leader {
                    let changed = outcome
                        .previous_leader
                        .map_or(true, |p| p.subject_id != leader.subject_id);
                    if changed {
                        self.emit(Event::NewLeader(*key, leader)).await;
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.freshness.mark_refresh_failed(key);
                warn!("Recompute for leaderboard {key} failed. {e}");
                self.emit(Event::RefreshFailed(*key, e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn try_recompute(&self, key: &LeaderboardKey) -> EngineResult<RefreshOutcome> {
        let snapshot = self.source.compute(key).await?;
        let computed_at = snapshot.computed_at;

        let board = self.cache.board(key);
        // Scoped to force the guard to drop before the next await.
        let (entries, previous_leader, new_leader) = {
            let mut data = board.lock().unwrap();
            let previous_leader = data.top_n(1).pop();
            data.replace_all(snapshot.entries)?;
            (data.size(), previous_leader, data.top_n(1).pop())
        };

        Ok(RefreshOutcome {
            computed_at,
            entries,
            previous_leader,
            new_leader,
        })
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            let error =
                EngineError::ChannelSend(format!("Could not send event to monitoring channel. {e}"));
            error!("{error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::key::{Metric, Mode, Period};
    use crate::ranking::leaderboard::{RankEntry, RankedSnapshot};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn key() -> LeaderboardKey {
        LeaderboardKey::new(Mode::Backtest, Metric::TotalPnl, Period::Days30)
    }

    struct StubSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: std::time::Duration,
        entries: Mutex<Vec<RankEntry>>,
    }

    impl StubSource {
        fn with(entries: &[(&str, f64)], fail: bool, delay: std::time::Duration) -> Arc<StubSource> {
            Arc::new(StubSource {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(fail),
                delay,
                entries: Mutex::new(
                    entries
                        .iter()
                        .map(|(subject, score)| RankEntry {
                            subject_id: subject.to_string(),
                            score: *score,
                        })
                        .collect(),
                ),
            })
        }

        fn serving(entries: &[(&str, f64)]) -> Arc<StubSource> {
            StubSource::with(entries, false, std::time::Duration::ZERO)
        }

        fn slow(entries: &[(&str, f64)], delay: std::time::Duration) -> Arc<StubSource> {
            StubSource::with(entries, false, delay)
        }

        fn failing() -> Arc<StubSource> {
            StubSource::with(&[], true, std::time::Duration::ZERO)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceComputer for StubSource {
        async fn compute(&self, _key: &LeaderboardKey) -> EngineResult<RankedSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            match self.fail.load(Ordering::SeqCst) {
                true => Err(EngineError::Source("warehouse offline".to_string())),
                false => Ok(RankedSnapshot {
                    computed_at: Utc::now(),
                    entries: self.entries.lock().unwrap().clone(),
                }),
            }
        }
    }

    struct Harness {
        coordinator: RefreshCoordinator,
        cache: MemoryCache,
        freshness: FreshnessTracker,
        rx: mpsc::Receiver<Event>,
    }

    fn policy() -> RefreshPolicy {
        RefreshPolicy {
            fresh_window: Duration::seconds(300),
            entry_ttl: Duration::seconds(3600),
            source_timeout: std::time::Duration::from_millis(500),
        }
    }

    fn harness(source: Arc<StubSource>) -> Harness {
        let (tx, rx) = mpsc::channel::<Event>(64);
        let cache = MemoryCache::new();
        let freshness = FreshnessTracker::new();
        let coordinator = RefreshCoordinator::new(
            cache.clone(),
            freshness.clone(),
            source,
            Arc::new(tx),
            policy(),
        );
        Harness {
            coordinator,
            cache,
            freshness,
            rx,
        }
    }

    fn seed_aged(h: &Harness, entries: &[(&str, f64)], age_seconds: i64) {
        let board = h.cache.board(&key());
        let mut data = board.lock().unwrap();
        for (subject, score) in entries {
            data.upsert(subject, *score).unwrap();
        }
        drop(data);
        h.freshness
            .mark_refreshed(&key(), Utc::now() - Duration::seconds(age_seconds));
    }

    #[tokio::test]
    async fn miss_recomputes_synchronously_then_serves_fresh_hits() {
        let source = StubSource::serving(&[("X", 10.0)]);
        let h = harness(source.clone());

        let view = h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(view.provenance, Provenance::MissSynchronous);
        assert_eq!(view.entries.len(), 1);
        assert_eq!(
            (view.entries[0].subject_id.as_str(), view.entries[0].rank),
            ("X", 1)
        );
        assert_eq!(view.entries[0].score, 10.0);
        assert_eq!(source.calls(), 1);

        // within the fresh window the read path is source-free
        let view = h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(view.provenance, Provenance::FreshHit);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn stale_hit_serves_old_data_and_refreshes_in_background() {
        let source = StubSource::serving(&[("A", 5.0), ("B", 9.0)]);
        let h = harness(source.clone());
        seed_aged(&h, &[("A", 1.0)], 600);

        let view = h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(view.provenance, Provenance::StaleHitRefreshing);
        assert_eq!(view.entries.len(), 1);
        assert_eq!(view.entries[0].score, 1.0);

        // let the background task land
        time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 1);
        assert!(h.freshness.is_fresh(&key(), Duration::seconds(300)));

        let view = h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(view.provenance, Provenance::FreshHit);
        assert_eq!(view.entries[0].subject_id, "B");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_stale_reads_share_one_recompute() {
        let source = StubSource::slow(&[("A", 2.0)], std::time::Duration::from_millis(100));
        let h = harness(source.clone());
        seed_aged(&h, &[("A", 1.0)], 600);

        let k = key();
        let (a, b, c, d) = tokio::join!(
            h.coordinator.get(&k, 10),
            h.coordinator.get(&k, 10),
            h.coordinator.get(&k, 10),
            h.coordinator.get(&k, 10),
        );
        for view in [a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()] {
            assert_eq!(view.provenance, Provenance::StaleHitRefreshing);
            assert_eq!(view.entries[0].score, 1.0);
        }

        time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(
            h.coordinator.rank_of(&key(), "A"),
            RankLookup::Ranked(RankedEntry {
                subject_id: "A".to_string(),
                score: 2.0,
                rank: 1,
            })
        );
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_synchronous_recompute() {
        let source = StubSource::slow(&[("X", 10.0)], std::time::Duration::from_millis(80));
        let h = harness(source.clone());

        let k = key();
        let (a, b, c) = tokio::join!(
            h.coordinator.get(&k, 10),
            h.coordinator.get(&k, 10),
            h.coordinator.get(&k, 10),
        );
        for view in [a.unwrap(), b.unwrap(), c.unwrap()] {
            assert_eq!(view.provenance, Provenance::MissSynchronous);
            assert_eq!(view.entries[0].subject_id, "X");
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn miss_with_failing_source_is_a_hard_failure() {
        let source = StubSource::failing();
        let h = harness(source.clone());

        let result = h.coordinator.get(&key(), 10).await;
        assert!(matches!(result, Err(EngineError::Source(_))));
        assert!(!h.freshness.is_refreshing(&key()));
        assert_eq!(source.calls(), 1);

        // gate reopened: the next read retries the source
        let result = h.coordinator.get(&key(), 10).await;
        assert!(result.is_err());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn failed_background_refresh_keeps_stale_data_and_retries_on_next_read() {
        let source = StubSource::failing();
        let h = harness(source.clone());
        seed_aged(&h, &[("A", 1.0)], 600);
        let refreshed_at = h.freshness.last_refreshed_at(&key()).unwrap();

        let view = h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(view.provenance, Provenance::StaleHitRefreshing);

        time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 1);
        assert!(!h.freshness.is_refreshing(&key()));
        assert_eq!(h.freshness.last_refreshed_at(&key()), Some(refreshed_at));

        // stale data still served unchanged, and the refresh retried
        let view = h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(view.provenance, Provenance::StaleHitRefreshing);
        assert_eq!(view.entries[0].score, 1.0);
        time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn entries_beyond_the_ttl_are_misses() {
        let source = StubSource::serving(&[("B", 3.0)]);
        let h = harness(source.clone());
        // older than the 3600s ttl
        seed_aged(&h, &[("A", 1.0)], 7200);

        let view = h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(view.provenance, Provenance::MissSynchronous);
        assert_eq!(view.entries[0].subject_id, "B");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn serve_maps_hard_failures_to_the_fallback_provenance() {
        let h = harness(StubSource::failing());
        let response = h.coordinator.serve(&key(), 10).await;
        assert_eq!(response.provenance, Provenance::SourceFailureFallback);
        assert!(response.entries.is_empty());
        assert!(response.error.is_some());

        let h = harness(StubSource::serving(&[("A", 1.0)]));
        let response = h.coordinator.serve(&key(), 10).await;
        assert_eq!(response.provenance, Provenance::MissSynchronous);
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn rank_lookups_distinguish_missing_subject_from_missing_board() {
        let h = harness(StubSource::serving(&[("A", 1.0)]));

        assert_eq!(
            h.coordinator.rank_of(&key(), "A"),
            RankLookup::UnknownLeaderboard
        );

        h.coordinator.get(&key(), 10).await.unwrap();
        assert_eq!(
            h.coordinator.rank_of(&key(), "missing"),
            RankLookup::UnknownSubject
        );
        assert!(matches!(
            h.coordinator.rank_of(&key(), "A"),
            RankLookup::Ranked(_)
        ));
    }

    #[tokio::test]
    async fn refresh_is_a_noop_while_a_recompute_is_in_flight() {
        let source = StubSource::slow(&[("A", 1.0)], std::time::Duration::from_millis(80));
        let h = harness(source.clone());

        let k = key();
        let (first, second) = tokio::join!(
            h.coordinator.refresh(&k),
            h.coordinator.refresh(&k),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn refresh_emits_monitoring_events() {
        let source = StubSource::serving(&[("X", 10.0)]);
        let mut h = harness(source);
        h.coordinator.get(&key(), 10).await.unwrap();

        let first = h.rx.try_recv().unwrap();
        assert!(matches!(first, Event::LeaderboardRefreshed(k, 1, _) if k == key()));
        let second = h.rx.try_recv().unwrap();
        assert!(
            matches!(second, Event::NewLeader(k, ref leader) if k == key() && leader.subject_id == "X")
        );
    }
}
