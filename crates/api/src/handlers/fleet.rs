//! Fleet console handlers (admin only).
//!
//! Operators inspect the worker registry and take workers out of or back
//! into rotation. `cordon` stops new dispatches; `drain` does the same and
//! signals that in-flight jobs should be allowed to finish before the
//! worker is retired.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use fetchplane_core::audit::user_actor;
use fetchplane_core::error::CoreError;
use fetchplane_core::types::DbId;
use fetchplane_core::worker_pool::{is_stale, validate_fleet_action, FleetAction};
use fetchplane_db::models::worker::{FleetActionRequest, Worker};
use fetchplane_db::repositories::WorkerRepo;
use fetchplane_events::names;
use fetchplane_events::PlatformEvent;

use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// Default number of health log rows returned.
const DEFAULT_HEALTH_LOG_LIMIT: i64 = 100;

/// A registry entry as shown in the console.
#[derive(Debug, Serialize)]
pub struct WorkerView {
    #[serde(flatten)]
    pub worker: Worker,
    /// No heartbeat within the last five minutes.
    pub stale: bool,
}

impl From<Worker> for WorkerView {
    fn from(worker: Worker) -> Self {
        let stale = is_stale(worker.last_heartbeat_at, Utc::now());
        Self { worker, stale }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthLogQuery {
    pub limit: Option<i64>,
}

async fn find_worker(state: &AppState, id: DbId) -> AppResult<Worker> {
    WorkerRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::not_found("Worker", id)))
}

/// GET /api/v1/admin/workers
pub async fn list_workers(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let workers: Vec<WorkerView> = WorkerRepo::list(&state.pool)
        .await?
        .into_iter()
        .map(WorkerView::from)
        .collect();
    Ok(Json(DataResponse { data: workers }))
}

/// GET /api/v1/admin/workers/{id}
pub async fn get_worker(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let worker = find_worker(&state, id).await?;
    Ok(Json(DataResponse {
        data: WorkerView::from(worker),
    }))
}

/// POST /api/v1/admin/workers/{id}/cordon
pub async fn cordon_worker(
    admin: RequireAdmin,
    state: State<AppState>,
    id: Path<DbId>,
    body: Option<Json<FleetActionRequest>>,
) -> AppResult<impl IntoResponse> {
    apply_action(admin, state, id, body, FleetAction::Cordon).await
}

/// POST /api/v1/admin/workers/{id}/drain
pub async fn drain_worker(
    admin: RequireAdmin,
    state: State<AppState>,
    id: Path<DbId>,
    body: Option<Json<FleetActionRequest>>,
) -> AppResult<impl IntoResponse> {
    apply_action(admin, state, id, body, FleetAction::Drain).await
}

/// POST /api/v1/admin/workers/{id}/uncordon
pub async fn uncordon_worker(
    admin: RequireAdmin,
    state: State<AppState>,
    id: Path<DbId>,
    body: Option<Json<FleetActionRequest>>,
) -> AppResult<impl IntoResponse> {
    apply_action(admin, state, id, body, FleetAction::Uncordon).await
}

async fn apply_action(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Option<Json<FleetActionRequest>>,
    action: FleetAction,
) -> AppResult<Json<DataResponse<WorkerView>>> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let current = find_worker(&state, id).await?.status()?;
    validate_fleet_action(current, action)?;

    let target = action.target_status();
    let actor = user_actor(admin.user_id);
    let worker = WorkerRepo::set_status(&state.pool, id, target, &actor, reason)
        .await?
        .ok_or(AppError::Core(CoreError::not_found("Worker", id)))?;

    if current != target {
        tracing::info!(
            worker_id = id,
            worker = %worker.name,
            from = %current,
            to = %target,
            action = action.as_str(),
            actor = %actor,
            "Worker status changed by operator",
        );
        state.event_bus.publish(
            PlatformEvent::new(names::WORKER_STATUS_CHANGED)
                .for_worker(id)
                .with_actor(actor)
                .with_payload(serde_json::json!({
                    "action": action.as_str(),
                    "from": current,
                    "to": target,
                    "reason": reason,
                })),
        );
    }

    Ok(Json(DataResponse {
        data: WorkerView::from(worker),
    }))
}

/// GET /api/v1/admin/workers/{id}/health-log
pub async fn health_log(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<HealthLogQuery>,
) -> AppResult<impl IntoResponse> {
    find_worker(&state, id).await?;
    let entries = WorkerRepo::health_log(
        &state.pool,
        id,
        params.limit.unwrap_or(DEFAULT_HEALTH_LOG_LIMIT),
    )
    .await?;
    Ok(Json(DataResponse { data: entries }))
}
