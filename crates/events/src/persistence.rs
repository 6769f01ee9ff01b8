//! Writes bus events to the `events` table.
//!
//! The table is the durable trail behind job audit and fleet history, so
//! gaps are logged loudly: a lagged receiver reports how many events it
//! lost, and a failed insert is retried once when the failure looks
//! transient (pool exhaustion, I/O).

use std::time::Duration;

use fetchplane_core::types::DbId;
use fetchplane_db::repositories::EventRepo;
use fetchplane_db::DbPool;
use tokio::sync::broadcast;

use crate::bus::PlatformEvent;

const RETRY_DELAY: Duration = Duration::from_millis(250);

pub struct EventPersistence;

impl EventPersistence {
    /// Persist events until every [`EventBus`](crate::bus::EventBus) sender
    /// is dropped and the backlog is drained.
    pub async fn run(pool: DbPool, mut receiver: broadcast::Receiver<PlatformEvent>) {
        let mut written: u64 = 0;
        let mut lost: u64 = 0;

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    lost += n;
                    tracing::warn!(skipped = n, "Event trail gap: persistence lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match Self::persist_with_retry(&pool, &event).await {
                Ok(_) => written += 1,
                Err(e) => {
                    lost += 1;
                    tracing::error!(
                        error = %e,
                        event_type = %event.event_type,
                        source_id = event.source_entity_id.as_deref().unwrap_or("-"),
                        "Event not persisted",
                    );
                }
            }
        }

        tracing::info!(written, lost, "Event bus closed, persistence stopped");
    }

    async fn persist_with_retry(pool: &DbPool, event: &PlatformEvent) -> Result<DbId, sqlx::Error> {
        match Self::persist(pool, event).await {
            Err(e) if is_transient(&e) => {
                tracing::debug!(error = %e, "Retrying event insert");
                tokio::time::sleep(RETRY_DELAY).await;
                Self::persist(pool, event).await
            }
            other => other,
        }
    }

    /// Insert one event row.
    pub async fn persist(pool: &DbPool, event: &PlatformEvent) -> Result<DbId, sqlx::Error> {
        EventRepo::insert(
            pool,
            &event.event_type,
            event.source_entity_type.as_deref(),
            event.source_entity_id.as_deref(),
            event.actor.as_deref(),
            &event.payload,
        )
        .await
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pool_and_io_failures_are_retried() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(is_transient(&sqlx::Error::Io(std::io::Error::other("reset"))));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }
}
