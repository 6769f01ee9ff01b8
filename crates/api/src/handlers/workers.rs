//! Worker heartbeat ingress.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use fetchplane_core::worker_pool::{validate_base_url, validate_capacity, validate_worker_name};
use fetchplane_db::models::worker::WorkerHeartbeat;
use fetchplane_db::repositories::WorkerRepo;
use fetchplane_events::names;
use fetchplane_events::PlatformEvent;

use crate::error::AppResult;
use crate::middleware::worker_auth::WorkerAuth;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/workers/heartbeat
///
/// Upsert the worker's registry entry and record a telemetry sample. An
/// `offline` worker is reinstated; `cordoned` and `draining` stay put.
pub async fn heartbeat(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Json(input): Json<WorkerHeartbeat>,
) -> AppResult<impl IntoResponse> {
    validate_worker_name(&input.name)?;
    validate_base_url(&input.base_url)?;
    validate_capacity(input.active_jobs, input.max_jobs)?;

    let recorded = WorkerRepo::heartbeat(&state.pool, &input).await?;
    let worker = &recorded.worker;

    if recorded.registered {
        tracing::info!(worker_id = worker.id, worker = %worker.name, base_url = %worker.base_url, "Worker registered");
        state.event_bus.publish(
            PlatformEvent::new(names::WORKER_REGISTERED)
                .for_worker(worker.id)
                .with_payload(serde_json::json!({
                    "name": worker.name,
                    "base_url": worker.base_url,
                    "max_jobs": worker.max_jobs,
                })),
        );
    } else if recorded.reinstated {
        tracing::info!(worker_id = worker.id, worker = %worker.name, "Offline worker reinstated by heartbeat");
        state.event_bus.publish(
            PlatformEvent::new(names::WORKER_REINSTATED)
                .for_worker(worker.id)
                .with_payload(serde_json::json!({ "name": worker.name })),
        );
    } else {
        tracing::trace!(worker_id = worker.id, active_jobs = worker.active_jobs, "Heartbeat");
    }

    Ok(Json(DataResponse {
        data: recorded.worker,
    }))
}
