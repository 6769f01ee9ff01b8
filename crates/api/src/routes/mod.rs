pub mod admin;
pub mod callbacks;
pub mod health;
pub mod jobs;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Routes called by people: the job API and the operator console.
///
/// ```text
/// /jobs                                    list, submit (auth required)
/// /jobs/{id}                               get (owner or admin)
/// /jobs/{id}/cancel                        cancel (owner or admin)
/// /jobs/{id}/stream                        live progress WebSocket
///
/// /admin/dlq                               list dead-lettered jobs
/// /admin/dlq/{job_id}                      DLQ entries and queued messages for a job
/// /admin/dlq/{job_id}/replay               replay with reason + ticket (POST)
///
/// /admin/jobs/{id}/cancel                  operator cancel (POST)
/// /admin/jobs/{id}/fail                    operator force-fail (POST)
/// /admin/jobs/{id}/audit                   audit trail (GET)
///
/// /admin/workers                           fleet console list
/// /admin/workers/{id}                      worker detail
/// /admin/workers/{id}/cordon               stop new dispatches (POST)
/// /admin/workers/{id}/drain                drain (POST)
/// /admin/workers/{id}/uncordon             back into rotation (POST)
/// /admin/workers/{id}/health-log           status change history (GET)
/// ```
pub fn client_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/admin", admin::router())
}

/// Routes called by fetch workers. Neither takes a user token.
///
/// ```text
/// /callbacks/progress                      signed progress callback
/// /workers/heartbeat                       heartbeat (shared secret)
/// ```
pub fn worker_routes() -> Router<AppState> {
    Router::new()
        .nest("/callbacks", callbacks::router())
        .nest("/workers", workers::router())
}
