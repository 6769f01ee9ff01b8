//! Expiry sweep for jobs that were never dispatched.
//!
//! A job still in `submitted` after `expiry_hours` moves to `expired`. Its
//! dispatch message, if any is left, is skipped by the dispatcher because
//! the job is terminal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use fetchplane_core::audit::actors;
use fetchplane_core::progress::ProgressUpdate;
use fetchplane_core::types::JobId;
use fetchplane_db::models::status::JobStatus;
use fetchplane_db::repositories::JobRepo;
use fetchplane_events::names;
use fetchplane_events::{EventBus, PlatformEvent};

use crate::engine::progress::ProgressHub;

/// How often the sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300); // 5 minutes

/// Run the expiry sweep until `cancel` is triggered.
pub async fn run(
    pool: PgPool,
    progress_hub: Arc<ProgressHub>,
    event_bus: Arc<EventBus>,
    expiry_hours: i64,
    cancel: CancellationToken,
) {
    tracing::info!(
        expiry_hours,
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Job expiry sweep started"
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job expiry sweep stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = sweep_once(&pool, &progress_hub, &event_bus, expiry_hours).await {
                    tracing::error!(error = %e, "Job expiry sweep failed");
                }
            }
        }
    }
}

/// Expire every job submitted more than `expiry_hours` ago and still
/// undispatched. Returns the expired ids.
pub async fn sweep_once(
    pool: &PgPool,
    progress_hub: &ProgressHub,
    event_bus: &EventBus,
    expiry_hours: i64,
) -> Result<Vec<JobId>, sqlx::Error> {
    let deadline = Utc::now() - chrono::Duration::hours(expiry_hours);
    let expired = JobRepo::expire_unclaimed(pool, deadline, actors::EXPIRY_SWEEP).await?;
    if expired.is_empty() {
        tracing::debug!("Job expiry sweep: nothing to expire");
        return Ok(expired);
    }

    tracing::info!(count = expired.len(), "Job expiry sweep: expired unclaimed jobs");

    for &job_id in &expired {
        if let Err(e) = progress_hub
            .update(job_id, ProgressUpdate::status(JobStatus::Expired))
            .await
        {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to push expiry to progress actor");
        }
        event_bus.publish(
            PlatformEvent::new(names::JOB_EXPIRED)
                .for_job(job_id)
                .with_actor(actors::EXPIRY_SWEEP)
                .with_payload(serde_json::json!({ "expiry_hours": expiry_hours })),
        );
    }

    Ok(expired)
}
