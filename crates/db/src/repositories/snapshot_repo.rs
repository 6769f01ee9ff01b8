//! Repository for the `progress_snapshots` table.

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use fetchplane_core::progress::ProgressSnapshot;
use fetchplane_core::types::JobId;

/// Persists the live snapshot owned by each progress actor.
pub struct SnapshotRepo;

impl SnapshotRepo {
    /// Insert or replace the snapshot for its job.
    pub async fn upsert(pool: &PgPool, snapshot: &ProgressSnapshot) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO progress_snapshots (job_id, snapshot, updated_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 snapshot = EXCLUDED.snapshot, updated_at = NOW()",
        )
        .bind(snapshot.job_id)
        .bind(Json(snapshot))
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete_in(conn: &mut PgConnection, job_id: JobId) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM progress_snapshots WHERE job_id = $1")
            .bind(job_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Load the last persisted snapshot for a job.
    pub async fn load(pool: &PgPool, job_id: JobId) -> Result<Option<ProgressSnapshot>, sqlx::Error> {
        let row: Option<Json<ProgressSnapshot>> =
            sqlx::query_scalar("SELECT snapshot FROM progress_snapshots WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|Json(snapshot)| snapshot))
    }
}
