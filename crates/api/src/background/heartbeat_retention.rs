//! Hourly pruning of `worker_heartbeats` history.
//!
//! Each worker row keeps its latest telemetry, so pruning only shortens the
//! sample history the fleet console charts from. A retention of zero or
//! less disables the loop.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use fetchplane_db::repositories::WorkerRepo;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn run(pool: PgPool, retention_hours: i64, cancel: CancellationToken) {
    if retention_hours <= 0 {
        tracing::info!("Heartbeat retention disabled");
        return;
    }

    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = purge_once(&pool, retention_hours).await {
                    tracing::error!(error = %e, "Heartbeat sample purge failed");
                }
            }
        }
    }
    tracing::debug!("Heartbeat retention stopped");
}

/// Delete samples older than `retention_hours`. Returns rows removed.
pub async fn purge_once(pool: &PgPool, retention_hours: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - chrono::Duration::hours(retention_hours);
    let deleted = WorkerRepo::delete_samples_older_than(pool, cutoff).await?;
    if deleted > 0 {
        tracing::info!(deleted, retention_hours, "Purged old heartbeat samples");
    }
    Ok(deleted)
}
