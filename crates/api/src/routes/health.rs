use axum::extract::State;
use axum::{routing::get, Json, Router};
use fetchplane_db::repositories::WorkerRepo;
use serde::Serialize;

use crate::state::AppState;

/// Liveness plus a coarse view of dispatch capacity.
///
/// Always answers 200; `status` is `degraded` when Postgres is unreachable.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    /// Healthy workers below their job ceiling.
    pub dispatchable_workers: usize,
    /// Sum of free slots across those workers.
    pub free_slots: i64,
    pub progress_actors: usize,
    pub stream_connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = fetchplane_db::health_check(&state.pool).await.is_ok();

    let candidates = if db_healthy {
        WorkerRepo::list_candidates(&state.pool)
            .await
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    let free_slots = candidates
        .iter()
        .map(|w| i64::from(w.max_jobs - w.active_jobs))
        .sum();

    Json(HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        dispatchable_workers: candidates.len(),
        free_slots,
        progress_actors: state.progress_hub.actor_count().await,
        stream_connections: state.ws_manager.connection_count().await,
    })
}

/// `GET /health`, mounted at the root rather than under `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
