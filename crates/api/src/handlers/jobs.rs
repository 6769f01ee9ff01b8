//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication via [`AuthUser`].
//! Admin users can list all jobs; regular users see only their own.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use fetchplane_core::audit::{causes, user_actor};
use fetchplane_core::error::CoreError;
use fetchplane_core::source::{idempotency_key, validate_source};
use fetchplane_core::types::JobId;
use fetchplane_db::models::job::{Job, JobListQuery, NewJob, SubmitJob};
use fetchplane_db::repositories::JobRepo;
use fetchplane_events::names;
use fetchplane_events::PlatformEvent;

use crate::engine::lifecycle;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::authorize_job;
use crate::response::{Created, DataResponse};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job by ID and verify the caller owns it (or is admin).
///
/// Returns `NotFound` if the job does not exist, `Forbidden` if the caller
/// is not the owner and is not an admin. `action` is used in the error
/// message (e.g. "view", "cancel", "watch").
pub(crate) async fn find_and_authorize(
    pool: &sqlx::PgPool,
    job_id: JobId,
    auth: &AuthUser,
    action: &str,
) -> AppResult<Job> {
    let job = JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or_else(|| AppError::Core(CoreError::not_found_by("Job", job_id)))?;

    authorize_job(auth, job.user_id, action)?;
    Ok(job)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a magnet link or uploaded torrent reference. Returns 201 with the
/// created job, or 409 if the same source is already live for this user.
/// The job starts in `submitted` and its first dispatch message is enqueued
/// in the same transaction, which commits only after the progress hub holds
/// the fresh snapshot.
pub async fn submit_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitJob>,
) -> AppResult<Created<Job>> {
    validate_source(input.source_type, &input.source_payload)?;

    let payload = input.source_payload.trim().to_string();
    let new_job = NewJob {
        id: uuid::Uuid::now_v7(),
        user_id: auth.user_id,
        source_type: input.source_type,
        idempotency_key: idempotency_key(auth.user_id, input.source_type, &payload),
        source_payload: payload,
        correlation_id: uuid::Uuid::new_v4(),
    };

    let mut tx = state.pool.begin().await?;
    let job = JobRepo::submit_in(&mut tx, &new_job, state.config.dedup_window_secs).await?;
    state.progress_hub.init(job.id).await?;
    if let Err(e) = tx.commit().await {
        state.progress_hub.evict(job.id).await;
        return Err(e.into());
    }

    tracing::info!(
        job_id = %job.id,
        source_type = %input.source_type,
        user_id = auth.user_id,
        correlation_id = %new_job.correlation_id,
        "Job submitted",
    );

    state.event_bus.publish(
        PlatformEvent::new(names::JOB_SUBMITTED)
            .for_job(job.id)
            .with_actor(user_actor(auth.user_id))
            .with_payload(serde_json::json!({
                "source_type": input.source_type,
                "correlation_id": new_job.correlation_id,
            })),
    );

    Ok(Created(job))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List jobs. Admin users see all jobs; regular users see only their own.
/// Supports optional `status`, `limit`, and `offset` query parameters.
pub async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let owner = if auth.is_admin() {
        None
    } else {
        Some(auth.user_id)
    };
    let jobs = JobRepo::list(&state.pool, owner, &params).await?;

    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state.pool, job_id, &auth, "view").await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a job. Users can only cancel their own jobs; admins can cancel
/// any job. Cancelling a job that already finished returns it unchanged.
pub async fn cancel_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state.pool, job_id, &auth, "cancel").await?;

    let job = lifecycle::cancel_job(
        &state,
        job_id,
        causes::USER_CANCEL,
        &user_actor(auth.user_id),
        None,
    )
    .await?;

    Ok(Json(DataResponse { data: job }))
}
