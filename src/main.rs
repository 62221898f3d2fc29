use podium::client::analytics::AnalyticsClient;
use podium::config::SETTINGS;
use podium::core::coordinator::{RefreshCoordinator, RefreshPolicy};
use podium::core::events::Event;
use podium::core::freshness::FreshnessTracker;
use podium::scheduler::{JobProcess, Scheduler};
use podium::storage::MemoryCache;

use tokio::sync::mpsc;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(SETTINGS.get_trace_level())
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Setting default subscriber failed");

    // Capacity of 64 should be more than plenty to handle all the refresh
    // notifications.
    let (tx, mut rx) = mpsc::channel::<Event>(64);
    let sender = Arc::new(tx);

    let cache = MemoryCache::new();
    let freshness = FreshnessTracker::new();
    let source = Arc::new(AnalyticsClient::new(
        SETTINGS.analytics_base_url.clone(),
        Duration::from_millis(SETTINGS.source_compute_timeout_millis),
        SETTINGS.analytics_api_token.clone(),
    ));
    let coordinator = RefreshCoordinator::new(
        cache,
        freshness,
        source,
        sender.clone(),
        RefreshPolicy::from_settings(),
    );

    let sched = Scheduler::new(coordinator, sender.clone()).await?;

    let mut jobs = vec![JobProcess::RefreshLeaderboards(
        &SETTINGS.warm_refresh_schedule,
    )];
    if SETTINGS.warm_on_start {
        // only ran once, at startup.
        jobs.insert(0, JobProcess::WarmLeaderboards);
    }
    for job in jobs {
        sched.add_job(job).await?;
    }

    info!("Starting scheduler.");
    sched.start().await?;

    info!("Monitoring refresh events.");
    while let Some(event) = rx.recv().await {
        info!("{event}");
    }

    Ok(())
}
