//! Dead-letter queue console (admin only).
//!
//! A replay is an explicit operator override: it requires a reason and a
//! ticket reference, both of which end up on the DLQ entry and in the job's
//! audit trail.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use validator::Validate;
use fetchplane_core::audit::user_actor;
use fetchplane_core::error::CoreError;
use fetchplane_core::types::JobId;
use fetchplane_db::models::dispatch::QueuedDispatch;
use fetchplane_db::models::dlq::{DlqEntry, DlqListQuery, ReplayRequest};
use fetchplane_db::models::job::Job;
use fetchplane_db::repositories::{DispatchQueueRepo, DlqRepo};
use fetchplane_events::names;
use fetchplane_events::PlatformEvent;

use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// Everything the console shows for one job's delivery history.
#[derive(Debug, Serialize)]
pub struct JobDeliveries {
    pub job_id: JobId,
    /// DLQ entries, newest first. At most one is pending.
    pub entries: Vec<DlqEntry>,
    /// Messages still in the dispatch queue for this job.
    pub queued: Vec<QueuedDispatch>,
}

#[derive(Debug, Serialize)]
pub struct Replayed {
    pub entry: DlqEntry,
    pub job: Job,
}

/// GET /api/v1/admin/dlq
pub async fn list_entries(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Query(params): Query<DlqListQuery>,
) -> AppResult<impl IntoResponse> {
    let entries = DlqRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: entries }))
}

/// GET /api/v1/admin/dlq/{job_id}
pub async fn get_for_job(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let entries = DlqRepo::list_for_job(&state.pool, job_id).await?;
    if entries.is_empty() {
        return Err(AppError::Core(CoreError::not_found_by("DLQ entry for job", job_id)));
    }
    let queued = DispatchQueueRepo::list_for_job(&state.pool, job_id).await?;

    Ok(Json(DataResponse {
        data: JobDeliveries {
            job_id,
            entries,
            queued,
        },
    }))
}

/// POST /api/v1/admin/dlq/{job_id}/replay
///
/// Reset the failed job to `submitted` and re-enqueue its original message
/// with `attempt = 0`. Returns 404 if the job has no pending entry.
pub async fn replay(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(input): Json<ReplayRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let reason = input.reason.trim();
    let ticket = input.ticket.trim();
    if reason.is_empty() || ticket.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "Replay requires a non-blank reason and ticket".into(),
        )));
    }

    let actor = user_actor(admin.user_id);
    let mut tx = state.pool.begin().await?;
    let (entry, job) = DlqRepo::replay_in(&mut tx, job_id, &actor, reason, ticket).await?;
    state.progress_hub.init(job_id).await?;
    if let Err(e) = tx.commit().await {
        state.progress_hub.evict(job_id).await;
        return Err(e.into());
    }

    tracing::warn!(
        job_id = %job_id,
        actor = %actor,
        ticket,
        previous_attempts = entry.attempts,
        "Dead-lettered job replayed by operator",
    );

    state.event_bus.publish(
        PlatformEvent::new(names::JOB_REPLAYED)
            .for_job(job_id)
            .with_actor(actor)
            .with_payload(serde_json::json!({
                "reason": reason,
                "ticket": ticket,
                "previous_attempts": entry.attempts,
                "last_error": entry.last_error,
            })),
    );

    Ok(Json(DataResponse {
        data: Replayed { entry, job },
    }))
}
