use tokio_cron_scheduler::{Job, JobScheduler};

use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tracing::{error, info};

use crate::core::coordinator::RefreshCoordinator;
use crate::core::events::Event;
use crate::error::{EngineError, EngineResult};
use crate::ranking::key::LeaderboardKey;

pub struct Scheduler {
    scheduler: JobScheduler,
    coordinator: RefreshCoordinator,
    sender: Arc<Sender<Event>>, // communication to the monitoring loop
}

pub enum JobProcess<'schedule> {
    WarmLeaderboards,
    RefreshLeaderboards(&'schedule str),
}

impl Scheduler {
    pub async fn new(
        coordinator: RefreshCoordinator,
        sender: Arc<Sender<Event>>,
    ) -> EngineResult<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Scheduler {
            scheduler,
            coordinator,
            sender,
        })
    }

    pub async fn add_job(&self, job_process: JobProcess<'_>) -> EngineResult<uuid::Uuid> {
        let job = match job_process {
            JobProcess::WarmLeaderboards => {
                warm_leaderboards_job(self.coordinator.clone(), self.sender.clone()).await?
            }
            JobProcess::RefreshLeaderboards(schedule) => {
                refresh_leaderboards_job(schedule, self.coordinator.clone()).await?
            }
        };
        Ok(self.scheduler.add(job).await?)
    }

    pub async fn start(&self) -> EngineResult<()> {
        Ok(self.scheduler.start().await?)
    }
}

//////////////////
// Jobs definition
//////////////////

// One-shot at startup: precompute every leaderboard combination so first
// reads are fresh hits.
async fn warm_leaderboards_job(
    coordinator: RefreshCoordinator,
    sender: Arc<Sender<Event>>,
) -> EngineResult<Job> {
    let job = Job::new_one_shot_async(std::time::Duration::from_secs(0), move |_uuid, _l| {
        let coordinator = coordinator.clone();
        let sender = sender.clone();
        Box::pin(async move {
            let mut refreshed = 0;
            let mut failed = 0;
            for key in LeaderboardKey::all() {
                match coordinator.refresh(&key).await {
                    Ok(()) => refreshed += 1,
                    Err(e) => {
                        failed += 1;
                        error!("Could not warm leaderboard {key}. {e}");
                    }
                }
            }
            if let Err(e) = sender.send(Event::LeaderboardsWarmed(refreshed, failed)).await {
                let error =
                    EngineError::ChannelSend(format!("Could not send message to MPSC channel. {e}"));
                error!("{error}");
            };
        })
    })?;
    Ok(job)
}

// Periodic re-warm of all boards. Runs through the same single-flight gate
// as demand-driven refreshes, so a board already being recomputed is skipped.
async fn refresh_leaderboards_job(
    schedule: &str,
    coordinator: RefreshCoordinator,
) -> EngineResult<Job> {
    let job = Job::new_async(schedule, move |uuid, mut l| {
        let coordinator = coordinator.clone();
        Box::pin(async move {
            for key in LeaderboardKey::all() {
                if let Err(e) = coordinator.refresh(&key).await {
                    error!("Scheduled refresh of leaderboard {key} failed. {e}");
                }
            }

            // Query the next execution time for this job
            let next_tick = l.next_tick_for_job(uuid).await;
            match next_tick {
                Ok(Some(ts)) => info!("Next scheduled refresh of all leaderboards at {:?}", ts),
                _ => error!("Could not get next tick for the leaderboard refresh job"),
            }
        })
    })?;
    Ok(job)
}
