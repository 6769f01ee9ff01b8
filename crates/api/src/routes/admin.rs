//! Route definitions for the operator console.
//!
//! Every handler takes [`RequireAdmin`](crate::middleware::rbac::RequireAdmin).

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{admin_jobs, dlq, fleet};
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// GET    /dlq                         -> list_entries
/// GET    /dlq/{job_id}                -> get_for_job
/// POST   /dlq/{job_id}/replay         -> replay
///
/// POST   /jobs/{id}/cancel            -> cancel_job
/// POST   /jobs/{id}/fail              -> fail_job
/// GET    /jobs/{id}/audit             -> audit_log
///
/// GET    /workers                     -> list_workers
/// GET    /workers/{id}                -> get_worker
/// POST   /workers/{id}/cordon         -> cordon_worker
/// POST   /workers/{id}/drain          -> drain_worker
/// POST   /workers/{id}/uncordon       -> uncordon_worker
/// GET    /workers/{id}/health-log     -> health_log
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dlq", get(dlq::list_entries))
        .route("/dlq/{job_id}", get(dlq::get_for_job))
        .route("/dlq/{job_id}/replay", post(dlq::replay))
        .route("/jobs/{id}/cancel", post(admin_jobs::cancel_job))
        .route("/jobs/{id}/fail", post(admin_jobs::fail_job))
        .route("/jobs/{id}/audit", get(admin_jobs::audit_log))
        .route("/workers", get(fleet::list_workers))
        .route("/workers/{id}", get(fleet::get_worker))
        .route("/workers/{id}/cordon", post(fleet::cordon_worker))
        .route("/workers/{id}/drain", post(fleet::drain_worker))
        .route("/workers/{id}/uncordon", post(fleet::uncordon_worker))
        .route("/workers/{id}/health-log", get(fleet::health_log))
}
