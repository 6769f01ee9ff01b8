//! Repository for the `workers`, `worker_heartbeats`, and
//! `worker_health_log` tables.

use sqlx::PgPool;
use fetchplane_core::audit::actors;
use fetchplane_core::types::{DbId, Timestamp};
use fetchplane_core::worker_pool::{status_after_heartbeat, WorkerCandidate};

use crate::models::status::{StatusId, WorkerStatus};
use crate::models::worker::{HeartbeatRecorded, Worker, WorkerHealthLogEntry, WorkerHeartbeat};

/// Column list for `workers` queries.
const COLUMNS: &str = "\
    id, name, base_url, status_id, active_jobs, max_jobs, \
    cpu_percent, memory_percent, disk_free_bytes, bandwidth_bps, version, \
    last_heartbeat_at, created_at, updated_at";

/// Column list for `worker_health_log` queries.
const HEALTH_LOG_COLUMNS: &str =
    "id, worker_id, from_status_id, to_status_id, reason, actor, created_at";

/// Maximum health log rows returned per request.
const MAX_HEALTH_LOG_LIMIT: i64 = 500;

/// Provides worker registry operations.
pub struct WorkerRepo;

impl WorkerRepo {
    /// Record a heartbeat: upsert the registry row, append a telemetry
    /// sample, and reinstate an `offline` worker.
    ///
    /// `cordoned` and `draining` are operator decisions and survive
    /// heartbeats unchanged.
    pub async fn heartbeat(
        pool: &PgPool,
        input: &WorkerHeartbeat,
    ) -> Result<HeartbeatRecorded, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<StatusId> =
            sqlx::query_scalar("SELECT status_id FROM workers WHERE name = $1 FOR UPDATE")
                .bind(&input.name)
                .fetch_optional(&mut *tx)
                .await?;
        let current_status = current.and_then(WorkerStatus::from_id);
        let next_status = status_after_heartbeat(current_status);

        let query = format!(
            "INSERT INTO workers \
                 (name, base_url, status_id, active_jobs, max_jobs, cpu_percent, memory_percent, \
                  disk_free_bytes, bandwidth_bps, version, last_heartbeat_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) \
             ON CONFLICT ON CONSTRAINT uq_workers_name DO UPDATE SET \
                 base_url = EXCLUDED.base_url, \
                 status_id = EXCLUDED.status_id, \
                 active_jobs = EXCLUDED.active_jobs, \
                 max_jobs = EXCLUDED.max_jobs, \
                 cpu_percent = EXCLUDED.cpu_percent, \
                 memory_percent = EXCLUDED.memory_percent, \
                 disk_free_bytes = EXCLUDED.disk_free_bytes, \
                 bandwidth_bps = EXCLUDED.bandwidth_bps, \
                 version = EXCLUDED.version, \
                 last_heartbeat_at = EXCLUDED.last_heartbeat_at \
             RETURNING {COLUMNS}"
        );
        let worker = sqlx::query_as::<_, Worker>(&query)
            .bind(&input.name)
            .bind(&input.base_url)
            .bind(next_status.id())
            .bind(input.active_jobs)
            .bind(input.max_jobs)
            .bind(input.cpu_percent)
            .bind(input.memory_percent)
            .bind(input.disk_free_bytes)
            .bind(input.bandwidth_bps)
            .bind(input.version.as_deref())
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO worker_heartbeats \
                 (worker_id, active_jobs, max_jobs, cpu_percent, memory_percent, \
                  disk_free_bytes, bandwidth_bps) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(worker.id)
        .bind(input.active_jobs)
        .bind(input.max_jobs)
        .bind(input.cpu_percent)
        .bind(input.memory_percent)
        .bind(input.disk_free_bytes)
        .bind(input.bandwidth_bps)
        .execute(&mut *tx)
        .await?;

        let reinstated = current_status == Some(WorkerStatus::Offline);
        if reinstated {
            Self::append_health_log(
                &mut tx,
                worker.id,
                current,
                next_status,
                Some("Heartbeat received"),
                actors::WORKER,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(HeartbeatRecorded {
            worker,
            reinstated,
            registered: current.is_none(),
        })
    }

    /// Find a worker by its id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List the whole fleet ordered by id.
    pub async fn list(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers ORDER BY id");
        sqlx::query_as::<_, Worker>(&query).fetch_all(pool).await
    }

    /// Workers that are `healthy` and below capacity, as selection input.
    pub async fn list_candidates(pool: &PgPool) -> Result<Vec<WorkerCandidate>, sqlx::Error> {
        let rows: Vec<(DbId, i32, i32)> = sqlx::query_as(
            "SELECT id, active_jobs, max_jobs FROM workers \
             WHERE status_id = $1 AND active_jobs < max_jobs \
             ORDER BY id",
        )
        .bind(WorkerStatus::Healthy.id())
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, active_jobs, max_jobs)| WorkerCandidate {
                id,
                status: WorkerStatus::Healthy,
                active_jobs,
                max_jobs,
            })
            .collect())
    }

    /// Count a newly started job against the worker until its next
    /// heartbeat reports the real figure.
    pub async fn reserve_slot(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE workers SET active_jobs = active_jobs + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Undo [`WorkerRepo::reserve_slot`] after a start call the worker rejected.
    pub async fn release_slot(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE workers SET active_jobs = GREATEST(active_jobs - 1, 0) WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Set an operator-chosen status and log the change.
    ///
    /// Returns `None` if the worker does not exist. Setting the status it
    /// already has is a no-op and writes no log row.
    pub async fn set_status(
        pool: &PgPool,
        id: DbId,
        to: WorkerStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Option<Worker>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<StatusId> =
            sqlx::query_scalar("SELECT status_id FROM workers WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(None);
        };

        let query = format!("UPDATE workers SET status_id = $2 WHERE id = $1 RETURNING {COLUMNS}");
        let worker = sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .bind(to.id())
            .fetch_one(&mut *tx)
            .await?;

        if current != to.id() {
            Self::append_health_log(&mut tx, id, Some(current), to, reason, actor).await?;
        }

        tx.commit().await?;
        Ok(Some(worker))
    }

    /// Status change history for one worker, newest first.
    pub async fn health_log(
        pool: &PgPool,
        worker_id: DbId,
        limit: i64,
    ) -> Result<Vec<WorkerHealthLogEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {HEALTH_LOG_COLUMNS} FROM worker_health_log \
             WHERE worker_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, WorkerHealthLogEntry>(&query)
            .bind(worker_id)
            .bind(limit.clamp(1, MAX_HEALTH_LOG_LIMIT))
            .fetch_all(pool)
            .await
    }

    /// Delete heartbeat samples recorded before `cutoff`. Returns rows removed.
    pub async fn delete_samples_older_than(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM worker_heartbeats WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_health_log(
        conn: &mut sqlx::PgConnection,
        worker_id: DbId,
        from: Option<StatusId>,
        to: WorkerStatus,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO worker_health_log (worker_id, from_status_id, to_status_id, reason, actor) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(worker_id)
        .bind(from)
        .bind(to.id())
        .bind(reason)
        .bind(actor)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
