//! Operator job overrides (admin only).

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use validator::Validate;
use fetchplane_core::audit::{causes, user_actor};
use fetchplane_core::error::CoreError;
use fetchplane_core::types::JobId;
use fetchplane_db::models::job::ForceFailRequest;
use fetchplane_db::repositories::JobRepo;

use crate::engine::lifecycle;
use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// Optional body for `POST /admin/jobs/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct AdminCancelRequest {
    pub reason: Option<String>,
}

/// POST /api/v1/admin/jobs/{id}/cancel
pub async fn cancel_job(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    body: Option<Json<AdminCancelRequest>>,
) -> AppResult<impl IntoResponse> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let job = lifecycle::cancel_job(
        &state,
        job_id,
        causes::OPERATOR_CANCEL,
        &user_actor(admin.user_id),
        reason,
    )
    .await?;

    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/admin/jobs/{id}/fail
///
/// Force the job into `failed` with the operator's reason as its error.
pub async fn fail_job(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(input): Json<ForceFailRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let reason = input.reason.trim();
    if reason.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "A reason is required to fail a job".into(),
        )));
    }

    let job = lifecycle::force_fail(
        &state,
        job_id,
        causes::OPERATOR_FAIL,
        &user_actor(admin.user_id),
        reason,
    )
    .await?;

    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/admin/jobs/{id}/audit
///
/// Terminal transitions and operator overrides for one job, oldest first.
pub async fn audit_log(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    if JobRepo::find_by_id(&state.pool, job_id).await?.is_none() {
        return Err(AppError::Core(CoreError::not_found_by("Job", job_id)));
    }
    let entries = JobRepo::audit_log(&state.pool, job_id).await?;
    Ok(Json(DataResponse { data: entries }))
}
