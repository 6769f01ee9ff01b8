//! Repository for the `jobs` and `job_audit_log` tables.
//!
//! Every status change goes through [`JobRepo::transition_in`], which locks
//! the row, consults the state machine in `fetchplane_core::job_state`, and
//! writes the audit entry for terminal moves in the same transaction.

use sqlx::{PgConnection, PgPool};
use fetchplane_core::audit::causes;
use fetchplane_core::job_state::{evaluate, InvalidTransition, TransitionOutcome, TERMINAL_STATUSES};
use fetchplane_core::progress::clamp_pct;
use fetchplane_core::types::{DbId, JobId, Timestamp};

use crate::error::JobStoreError;
use crate::models::audit::JobAuditEntry;
use crate::models::dispatch::DispatchMessage;
use crate::models::job::{AssignOutcome, AuditContext, Job, JobListQuery, NewJob, TransitionFields};
use crate::models::status::{JobStatus, StatusId};
use crate::repositories::DispatchQueueRepo;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, source_type, source_payload, idempotency_key, status_id, \
    worker_id, error_message, progress_percent, bytes_downloaded, bytes_total, \
    created_at, updated_at, completed_at";

/// Column list for `job_audit_log` queries.
const AUDIT_COLUMNS: &str =
    "id, job_id, from_status_id, to_status_id, reason, cause, actor, created_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

fn terminal_ids() -> Vec<StatusId> {
    TERMINAL_STATUSES.iter().map(|s| s.id()).collect()
}

/// A status change as it was applied to the row.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub outcome: TransitionOutcome,
    /// Status before the call.
    pub previous: JobStatus,
    /// The row after the call.
    pub job: Job,
}

/// Provides the job record store operations.
pub struct JobRepo;

impl JobRepo {
    /// Create a job row in `submitted` and enqueue its first dispatch message.
    ///
    /// Fails with `DuplicateSubmission` if the idempotency key already
    /// belongs to a non-terminal job, or to a job that completed within
    /// `dedup_window_secs`. Concurrent submissions of the same key are
    /// serialized with a transaction-scoped advisory lock.
    pub async fn submit(
        pool: &PgPool,
        input: &NewJob,
        dedup_window_secs: i64,
    ) -> Result<Job, JobStoreError> {
        let mut tx = pool.begin().await?;
        let job = Self::submit_in(&mut tx, input, dedup_window_secs).await?;
        tx.commit().await?;
        Ok(job)
    }

    /// [`submit`](Self::submit) inside the caller's transaction. The
    /// dispatch message becomes visible to consumers when it commits.
    pub async fn submit_in(
        conn: &mut PgConnection,
        input: &NewJob,
        dedup_window_secs: i64,
    ) -> Result<Job, JobStoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&input.idempotency_key)
            .execute(&mut *conn)
            .await?;

        let existing: Option<JobId> = sqlx::query_scalar(
            "SELECT id FROM jobs \
             WHERE idempotency_key = $1 \
               AND (status_id <> ALL($2) \
                    OR (status_id = $3 \
                        AND completed_at > NOW() - make_interval(secs => $4))) \
             ORDER BY created_at DESC \
             LIMIT 1",
        )
        .bind(&input.idempotency_key)
        .bind(terminal_ids())
        .bind(JobStatus::Completed.id())
        .bind(dedup_window_secs as f64)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(existing) = existing {
            return Err(JobStoreError::DuplicateSubmission { existing });
        }

        let query = format!(
            "INSERT INTO jobs (id, user_id, source_type, source_payload, idempotency_key, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(input.id)
            .bind(input.user_id)
            .bind(input.source_type.as_str())
            .bind(&input.source_payload)
            .bind(&input.idempotency_key)
            .bind(JobStatus::Submitted.id())
            .fetch_one(&mut *conn)
            .await?;

        let message = DispatchMessage {
            job_id: job.id,
            user_id: job.user_id,
            source_type: job.source_type.clone(),
            source_payload: job.source_payload.clone(),
            correlation_id: input.correlation_id,
            attempt: 0,
        };
        DispatchQueueRepo::enqueue(conn, &message).await?;
        Ok(job)
    }

    /// Find a job by its id.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs newest-first, optionally restricted to one user.
    pub async fn list(
        pool: &PgPool,
        user_id: Option<DbId>,
        params: &JobListQuery,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE ($1::BIGINT IS NULL OR user_id = $1) \
               AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(user_id)
            .bind(params.status.map(JobStatus::id))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Apply a status transition in its own transaction.
    pub async fn transition(
        pool: &PgPool,
        job_id: JobId,
        to: JobStatus,
        fields: &TransitionFields,
        audit: AuditContext<'_>,
    ) -> Result<Transitioned, JobStoreError> {
        let mut tx = pool.begin().await?;
        let result = Self::transition_in(&mut tx, job_id, to, fields, audit).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Apply a status transition on an open connection or transaction.
    ///
    /// - Terminal rows accept anything as a no-op.
    /// - Same-status requests on a live job merge the counter fields only.
    /// - Edges the state machine does not allow fail with
    ///   `InvalidTransition` and leave the row untouched.
    ///
    /// A move into a terminal status sets `completed_at` (once), appends to
    /// the audit log, and frees the owning worker's slot.
    pub async fn transition_in(
        conn: &mut PgConnection,
        job_id: JobId,
        to: JobStatus,
        fields: &TransitionFields,
        audit: AuditContext<'_>,
    ) -> Result<Transitioned, JobStoreError> {
        let current = Self::lock(conn, job_id).await?;
        let previous = current.status()?;

        let outcome = evaluate(previous, to)?;
        if outcome == TransitionOutcome::NoOp {
            return Ok(Transitioned {
                outcome,
                previous,
                job: current,
            });
        }

        let progress = if to == JobStatus::Completed {
            Some(100.0)
        } else {
            fields.progress_percent.map(clamp_pct)
        };
        let becomes_terminal = outcome == TransitionOutcome::Apply && to.is_terminal();

        let query = format!(
            "UPDATE jobs SET \
                 status_id = $2, \
                 progress_percent = GREATEST(progress_percent, COALESCE($3, progress_percent)), \
                 bytes_downloaded = GREATEST(bytes_downloaded, COALESCE($4, bytes_downloaded)), \
                 bytes_total = CASE WHEN $5 > 0 THEN $5 ELSE bytes_total END, \
                 error_message = COALESCE($6, error_message), \
                 completed_at = CASE WHEN $7 THEN COALESCE(completed_at, NOW()) ELSE completed_at END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(to.id())
            .bind(progress)
            .bind(fields.bytes_downloaded.map(|b| b.max(0)))
            .bind(fields.bytes_total)
            .bind(fields.error_message.as_deref())
            .bind(becomes_terminal)
            .fetch_one(&mut *conn)
            .await?;

        if becomes_terminal {
            Self::append_audit(conn, job_id, previous, to, audit).await?;
            if let Some(worker_id) = job.worker_id {
                sqlx::query(
                    "UPDATE workers SET active_jobs = GREATEST(active_jobs - 1, 0) WHERE id = $1",
                )
                .bind(worker_id)
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok(Transitioned {
            outcome,
            previous,
            job,
        })
    }

    /// Give a job to a worker.
    ///
    /// Assigning the current owner again is a no-op. A different owner on a
    /// non-terminal job is `AlreadyAssigned`.
    pub async fn assign_worker(
        pool: &PgPool,
        job_id: JobId,
        worker_id: DbId,
    ) -> Result<AssignOutcome, JobStoreError> {
        let mut tx = pool.begin().await?;
        let job = Self::lock(&mut tx, job_id).await?;

        if job.status()?.is_terminal() {
            return Ok(AssignOutcome::JobTerminal);
        }
        match job.worker_id {
            Some(current) if current == worker_id => return Ok(AssignOutcome::AlreadyOwned),
            Some(current) => return Err(JobStoreError::AlreadyAssigned { job_id, current }),
            None => {}
        }

        sqlx::query("UPDATE jobs SET worker_id = $2 WHERE id = $1")
            .bind(job_id)
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(AssignOutcome::Assigned)
    }

    /// Clear ownership if `worker_id` still owns the non-terminal job.
    ///
    /// Used after a failed start call so the next delivery can pick another
    /// worker. Returns `true` if the owner was cleared.
    pub async fn release_worker(
        pool: &PgPool,
        job_id: JobId,
        worker_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET worker_id = NULL \
             WHERE id = $1 AND worker_id = $2 AND status_id <> ALL($3)",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(terminal_ids())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset a failed job to `submitted` so it can be dispatched again.
    ///
    /// This is an operator override outside the normal state machine. It
    /// starts a new lifecycle: owner, error, counters, and `completed_at`
    /// are cleared. Only `failed` jobs can be reset.
    pub async fn reset_for_replay_in(
        conn: &mut PgConnection,
        job_id: JobId,
        actor: &str,
        reason: &str,
    ) -> Result<Job, JobStoreError> {
        let current = Self::lock(conn, job_id).await?;
        let previous = current.status()?;
        if previous != JobStatus::Failed {
            return Err(InvalidTransition {
                from: previous,
                to: JobStatus::Submitted,
            }
            .into());
        }

        let query = format!(
            "UPDATE jobs SET \
                 status_id = $2, worker_id = NULL, error_message = NULL, \
                 progress_percent = 0, bytes_downloaded = 0, bytes_total = 0, \
                 completed_at = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Submitted.id())
            .fetch_one(&mut *conn)
            .await?;

        Self::append_audit(
            conn,
            job_id,
            previous,
            JobStatus::Submitted,
            AuditContext {
                cause: causes::OPERATOR_REPLAY,
                actor,
                reason: Some(reason),
            },
        )
        .await?;

        Ok(job)
    }

    /// Move every `submitted` job created before `deadline` to `expired`.
    ///
    /// Returns the ids of the expired jobs.
    pub async fn expire_unclaimed(
        pool: &PgPool,
        deadline: Timestamp,
        actor: &str,
    ) -> Result<Vec<JobId>, sqlx::Error> {
        sqlx::query_scalar(
            "WITH expired AS ( \
                 UPDATE jobs SET status_id = $1, completed_at = COALESCE(completed_at, NOW()) \
                 WHERE status_id = $2 AND created_at < $3 \
                 RETURNING id \
             ) \
             INSERT INTO job_audit_log (job_id, from_status_id, to_status_id, reason, cause, actor) \
             SELECT id, $2, $1, 'Not dispatched before the expiry deadline', $4, $5 FROM expired \
             RETURNING job_id",
        )
        .bind(JobStatus::Expired.id())
        .bind(JobStatus::Submitted.id())
        .bind(deadline)
        .bind(causes::EXPIRED_UNCLAIMED)
        .bind(actor)
        .fetch_all(pool)
        .await
    }

    /// Audit trail for one job, oldest first.
    pub async fn audit_log(pool: &PgPool, job_id: JobId) -> Result<Vec<JobAuditEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {AUDIT_COLUMNS} FROM job_audit_log WHERE job_id = $1 ORDER BY created_at, id"
        );
        sqlx::query_as::<_, JobAuditEntry>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    async fn lock(conn: &mut PgConnection, job_id: JobId) -> Result<Job, JobStoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(JobStoreError::NotFound(job_id))
    }

    async fn append_audit(
        conn: &mut PgConnection,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        audit: AuditContext<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_audit_log (job_id, from_status_id, to_status_id, reason, cause, actor) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(job_id)
        .bind(from.id())
        .bind(to.id())
        .bind(audit.reason)
        .bind(audit.cause)
        .bind(audit.actor)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
