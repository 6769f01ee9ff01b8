//! Repository for the `dispatch_queue` table: a Postgres-backed
//! at-least-once queue.
//!
//! A message is visible once `visible_at <= NOW()`. Claiming it sets
//! `claimed_at` and pushes `visible_at` out by the lease length, so a
//! consumer that dies mid-message lets the row resurface on its own. Rows
//! are deleted only by [`DispatchQueueRepo::ack`].

use sqlx::{PgConnection, PgPool};
use fetchplane_core::types::{DbId, JobId};

use crate::models::dispatch::{DispatchMessage, QueuedDispatch};

/// Column list for `dispatch_queue` queries.
const COLUMNS: &str = "\
    id, job_id, user_id, source_type, source_payload, correlation_id, attempt, \
    last_error, visible_at, claimed_at, enqueued_at";

/// Provides queue operations for dispatcher consumers.
pub struct DispatchQueueRepo;

impl DispatchQueueRepo {
    /// Enqueue a message, visible immediately.
    pub async fn enqueue(
        conn: &mut PgConnection,
        message: &DispatchMessage,
    ) -> Result<QueuedDispatch, sqlx::Error> {
        let query = format!(
            "INSERT INTO dispatch_queue \
                 (job_id, user_id, source_type, source_payload, correlation_id, attempt) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueuedDispatch>(&query)
            .bind(message.job_id)
            .bind(message.user_id)
            .bind(&message.source_type)
            .bind(&message.source_payload)
            .bind(message.correlation_id)
            .bind(message.attempt)
            .fetch_one(&mut *conn)
            .await
    }

    /// Atomically claim the next visible message.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so parallel consumers never claim the
    /// same row. A row whose previous lease expired without an ack comes
    /// back with `attempt + 1`.
    pub async fn claim_next(
        pool: &PgPool,
        lease_secs: u64,
    ) -> Result<Option<QueuedDispatch>, sqlx::Error> {
        let query = format!(
            "UPDATE dispatch_queue SET \
                 attempt = CASE WHEN claimed_at IS NULL THEN attempt ELSE attempt + 1 END, \
                 claimed_at = NOW(), \
                 visible_at = NOW() + make_interval(secs => $1) \
             WHERE id = ( \
                 SELECT id FROM dispatch_queue \
                 WHERE visible_at <= NOW() \
                 ORDER BY visible_at, id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueuedDispatch>(&query)
            .bind(lease_secs as f64)
            .fetch_optional(pool)
            .await
    }

    /// Delete a message after successful handoff or DLQ publication.
    pub async fn ack(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM dispatch_queue WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release a failed message for redelivery after `delay_secs`.
    pub async fn redeliver(
        pool: &PgPool,
        id: DbId,
        next_attempt: i32,
        delay_secs: i64,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE dispatch_queue SET \
                 attempt = $2, \
                 last_error = $3, \
                 claimed_at = NULL, \
                 visible_at = NOW() + make_interval(secs => $4) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_attempt)
        .bind(error)
        .bind(delay_secs as f64)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Messages still queued for a job.
    pub async fn list_for_job(
        pool: &PgPool,
        job_id: JobId,
    ) -> Result<Vec<QueuedDispatch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM dispatch_queue WHERE job_id = $1 ORDER BY id");
        sqlx::query_as::<_, QueuedDispatch>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
