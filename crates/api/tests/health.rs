//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::http::StatusCode;
use common::{body_json, get};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with expected JSON fields
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn health_check_returns_ok_with_json(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = get(app.router(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["db_healthy"], true);
    assert_eq!(json["dispatchable_workers"], 0);
    assert_eq!(json["free_slots"], 0);
    assert_eq!(json["progress_actors"], 0);
    assert_eq!(json["stream_connections"], 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn health_reports_free_dispatch_capacity(pool: PgPool) {
    common::register_worker(&pool, "w1", 1, 4).await;
    common::register_worker(&pool, "w2", 2, 2).await;
    let app = common::build_test_app(pool);

    let json = body_json(get(app.router(), "/health").await).await;
    assert_eq!(json["dispatchable_workers"], 1);
    assert_eq!(json["free_slots"], 3);
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_route_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = get(app.router(), "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn response_contains_x_request_id_header(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = get(app.router(), "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    let id_str = request_id.to_str().unwrap();
    assert_eq!(id_str.len(), 36);
    assert!(uuid::Uuid::parse_str(id_str).is_ok());
}

// ---------------------------------------------------------------------------
// Test: CORS applies to client routes only
// ---------------------------------------------------------------------------

async fn preflight(app: axum::Router, uri: &str) -> axum::response::Response {
    let request = axum::http::Request::builder()
        .method("OPTIONS")
        .uri(uri)
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .body(axum::body::Body::empty())
        .unwrap();
    tower::ServiceExt::oneshot(app, request).await.unwrap()
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn cors_preflight_allows_dashboard_on_job_routes(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = preflight(app.router(), "/api/v1/jobs").await;

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn worker_ingress_has_no_cors(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = preflight(app.router(), "/api/v1/callbacks/progress").await;

    assert!(response.headers().get("access-control-allow-origin").is_none());
}
