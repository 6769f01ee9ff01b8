//! Repository for the `dlq_entries` table.

use sqlx::{PgConnection, PgPool};
use fetchplane_core::types::{DbId, JobId};

use crate::error::ReplayError;
use crate::models::dispatch::DispatchMessage;
use crate::models::dlq::{DlqEntry, DlqListQuery};
use crate::models::job::Job;
use crate::repositories::{DispatchQueueRepo, JobRepo, SnapshotRepo};

/// Column list for `dlq_entries` queries.
const COLUMNS: &str = "\
    id, job_id, message, attempts, last_error, dead_lettered_at, \
    replayed_at, replayed_by, replay_reason, replay_ticket";

/// Maximum page size for DLQ listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for DLQ listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides dead-letter queue operations.
pub struct DlqRepo;

impl DlqRepo {
    /// Record an exhausted message.
    ///
    /// A job has at most one pending entry; publishing again refreshes it.
    pub async fn publish(
        conn: &mut PgConnection,
        job_id: JobId,
        message: &serde_json::Value,
        attempts: i32,
        last_error: &str,
    ) -> Result<DlqEntry, sqlx::Error> {
        let query = format!(
            "INSERT INTO dlq_entries (job_id, message, attempts, last_error) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (job_id) WHERE replayed_at IS NULL DO UPDATE SET \
                 message = EXCLUDED.message, \
                 attempts = EXCLUDED.attempts, \
                 last_error = EXCLUDED.last_error, \
                 dead_lettered_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DlqEntry>(&query)
            .bind(job_id)
            .bind(message)
            .bind(attempts)
            .bind(last_error)
            .fetch_one(&mut *conn)
            .await
    }

    /// List entries newest-first. Replayed entries are hidden unless asked for.
    pub async fn list(pool: &PgPool, params: &DlqListQuery) -> Result<Vec<DlqEntry>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);
        let query = format!(
            "SELECT {COLUMNS} FROM dlq_entries \
             WHERE $1 OR replayed_at IS NULL \
             ORDER BY dead_lettered_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, DlqEntry>(&query)
            .bind(params.include_replayed.unwrap_or(false))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Every entry for a job, newest first.
    pub async fn list_for_job(pool: &PgPool, job_id: JobId) -> Result<Vec<DlqEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dlq_entries WHERE job_id = $1 ORDER BY dead_lettered_at DESC, id DESC"
        );
        sqlx::query_as::<_, DlqEntry>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Lock the pending entry for a job, if there is one.
    pub async fn lock_pending_for_job(
        conn: &mut PgConnection,
        job_id: JobId,
    ) -> Result<Option<DlqEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dlq_entries WHERE job_id = $1 AND replayed_at IS NULL FOR UPDATE"
        );
        sqlx::query_as::<_, DlqEntry>(&query)
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Stamp replay metadata on a pending entry.
    pub async fn mark_replayed(
        conn: &mut PgConnection,
        id: DbId,
        replayed_by: &str,
        reason: &str,
        ticket: &str,
    ) -> Result<DlqEntry, sqlx::Error> {
        let query = format!(
            "UPDATE dlq_entries SET \
                 replayed_at = NOW(), replayed_by = $2, replay_reason = $3, replay_ticket = $4 \
             WHERE id = $1 AND replayed_at IS NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DlqEntry>(&query)
            .bind(id)
            .bind(replayed_by)
            .bind(reason)
            .bind(ticket)
            .fetch_one(&mut *conn)
            .await
    }

    /// Replay a dead-lettered job in one transaction.
    ///
    /// Stamps the pending entry with the operator's reason and ticket,
    /// resets the job to `submitted` (new lifecycle), and re-enqueues the
    /// original message with `attempt = 0`.
    pub async fn replay(
        pool: &PgPool,
        job_id: JobId,
        actor: &str,
        reason: &str,
        ticket: &str,
    ) -> Result<(DlqEntry, Job), ReplayError> {
        let mut tx = pool.begin().await?;
        let replayed = Self::replay_in(&mut tx, job_id, actor, reason, ticket).await?;
        tx.commit().await?;
        Ok(replayed)
    }

    /// [`replay`](Self::replay) inside the caller's transaction. Also drops
    /// the job's persisted progress snapshot so a reloaded actor starts from
    /// the reset row.
    pub async fn replay_in(
        conn: &mut PgConnection,
        job_id: JobId,
        actor: &str,
        reason: &str,
        ticket: &str,
    ) -> Result<(DlqEntry, Job), ReplayError> {
        let entry = Self::lock_pending_for_job(conn, job_id)
            .await?
            .ok_or(ReplayError::NoPendingEntry(job_id))?;

        let audit_reason = format!("{reason} (ticket {ticket})");
        let job = JobRepo::reset_for_replay_in(conn, job_id, actor, &audit_reason).await?;

        let original: Option<DispatchMessage> = serde_json::from_value(entry.message.clone()).ok();
        let message = DispatchMessage {
            job_id,
            user_id: job.user_id,
            source_type: job.source_type.clone(),
            source_payload: job.source_payload.clone(),
            correlation_id: original
                .map(|m| m.correlation_id)
                .unwrap_or_else(uuid::Uuid::now_v7),
            attempt: 0,
        };
        DispatchQueueRepo::enqueue(conn, &message).await?;

        let entry = Self::mark_replayed(conn, entry.id, actor, reason, ticket).await?;
        SnapshotRepo::delete_in(conn, job_id).await?;

        Ok((entry, job))
    }
}
