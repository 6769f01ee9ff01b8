#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use fetchplane_api::auth::jwt::{generate_access_token, JwtConfig};
use fetchplane_api::config::{DispatchConfig, ProgressConfig, ServerConfig};
use fetchplane_api::engine::callback_dedup::CallbackDedup;
use fetchplane_api::engine::dispatcher::Dispatcher;
use fetchplane_api::engine::progress::{PgSnapshotStore, ProgressHub, SnapshotStore};
use fetchplane_api::engine::worker_client::{StartRequest, WorkerCallError, WorkerClient};
use fetchplane_api::router::build_app_router;
use fetchplane_api::state::AppState;
use fetchplane_api::ws::WsManager;
use fetchplane_core::callback_auth::{derive_credential, sign, TIMESTAMP_HEADER};
use fetchplane_core::roles::{ROLE_ADMIN, ROLE_USER};
use fetchplane_core::types::{DbId, JobId};
use fetchplane_db::models::worker::{Worker, WorkerHeartbeat};
use fetchplane_db::repositories::WorkerRepo;
use fetchplane_events::EventBus;

pub const CALLBACK_SECRET: &str = "test-callback-secret";
pub const WORKER_SECRET: &str = "test-worker-heartbeat-secret";
pub const MAGNET: &str =
    "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=ubuntu-24.04.iso";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "test-jwt-secret-that-is-long-enough".to_string(),
            access_token_expiry_mins: 15,
        },
        public_base_url: "http://control.test".to_string(),
        callback_secret: CALLBACK_SECRET.to_string(),
        worker_heartbeat_secret: WORKER_SECRET.to_string(),
        dedup_window_secs: 86_400,
        job_expiry_hours: 24,
        heartbeat_retention_hours: 24,
    }
}

// ---------------------------------------------------------------------------
// Fake worker
// ---------------------------------------------------------------------------

/// Records every call and fails start calls while `fail_starts` is set.
#[derive(Default)]
pub struct FakeWorkerClient {
    pub fail_starts: AtomicBool,
    pub starts: Mutex<Vec<(String, StartRequest)>>,
    pub cancels: Mutex<Vec<(String, JobId)>>,
}

impl FakeWorkerClient {
    pub fn set_failing(&self, failing: bool) {
        self.fail_starts.store(failing, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> Vec<(String, StartRequest)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn cancel_calls(&self) -> Vec<(String, JobId)> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerClient for FakeWorkerClient {
    async fn start(&self, base_url: &str, request: &StartRequest) -> Result<(), WorkerCallError> {
        self.starts
            .lock()
            .unwrap()
            .push((base_url.to_string(), request.clone()));
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(WorkerCallError::HttpStatus(503));
        }
        Ok(())
    }

    async fn cancel(&self, base_url: &str, job_id: JobId) -> Result<(), WorkerCallError> {
        self.cancels
            .lock()
            .unwrap()
            .push((base_url.to_string(), job_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Application state wired to a fake worker, plus handles tests poke at.
pub struct TestApp {
    pub state: AppState,
    pub workers: Arc<FakeWorkerClient>,
}

impl TestApp {
    /// A fresh router over the shared state. Each request consumes one.
    pub fn router(&self) -> Router {
        build_app_router(self.state.clone(), &self.state.config)
    }

    /// A dispatcher sharing this app's hub, bus, and fake worker.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.state.pool.clone(),
            self.workers.clone(),
            Arc::clone(&self.state.progress_hub),
            Arc::clone(&self.state.event_bus),
            DispatchConfig::default(),
            CALLBACK_SECRET.to_string(),
            self.state.config.callback_url(),
        )
    }
}

/// Build the full application with all middleware layers over `pool`.
///
/// Uses the same [`build_app_router`] as `main.rs` so integration tests
/// exercise the production middleware stack.
pub fn build_test_app(pool: PgPool) -> TestApp {
    let store = Arc::new(PgSnapshotStore::new(pool.clone()));
    build_test_app_with_store(pool, store)
}

/// [`build_test_app`] with the progress hub persisting through `store`.
pub fn build_test_app_with_store(pool: PgPool, store: Arc<dyn SnapshotStore>) -> TestApp {
    let config = Arc::new(test_config());
    let event_bus = Arc::new(EventBus::default());
    let workers = Arc::new(FakeWorkerClient::default());
    let progress_hub = Arc::new(ProgressHub::new(
        store,
        Arc::clone(&event_bus),
        ProgressConfig::default(),
    ));

    let state = AppState {
        pool,
        config,
        ws_manager: Arc::new(WsManager::new()),
        progress_hub,
        event_bus,
        worker_client: workers.clone(),
        callback_dedup: Arc::new(CallbackDedup::default()),
    };

    TestApp { state, workers }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn user_token(app: &TestApp, user_id: DbId) -> String {
    generate_access_token(user_id, ROLE_USER, &app.state.config.jwt).unwrap()
}

pub fn admin_token(app: &TestApp, user_id: DbId) -> String {
    generate_access_token(user_id, ROLE_ADMIN, &app.state.config.jwt).unwrap()
}

/// Register a healthy worker through the repository.
pub async fn register_worker(pool: &PgPool, name: &str, active_jobs: i32, max_jobs: i32) -> Worker {
    let input = WorkerHeartbeat {
        name: name.to_string(),
        base_url: format!("http://{name}.internal:8080"),
        active_jobs,
        max_jobs,
        cpu_percent: Some(10.0),
        memory_percent: Some(20.0),
        disk_free_bytes: Some(1 << 40),
        bandwidth_bps: Some(100_000_000),
        version: Some("1.0.0".to_string()),
    };
    WorkerRepo::heartbeat(pool, &input).await.unwrap().worker
}

/// Make every queued message visible now, skipping the backoff wait.
pub async fn expire_backoff(pool: &PgPool) {
    sqlx::query("UPDATE dispatch_queue SET visible_at = NOW()")
        .execute(pool)
        .await
        .unwrap();
}

/// Submit a magnet job through the API and return its id.
pub async fn submit_magnet(app: &TestApp, token: &str, payload: &str) -> JobId {
    let body = serde_json::json!({ "sourceType": "magnet", "sourcePayload": payload });
    let response = post_json_auth(app.router(), "/api/v1/jobs", body, token).await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    let json = body_json(response).await;
    json["data"]["id"].as_str().unwrap().parse().unwrap()
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST a progress callback signed the way a worker signs it.
pub async fn post_callback(app: Router, body: serde_json::Value) -> Response {
    let job_id: JobId = body["jobId"].as_str().unwrap().parse().unwrap();
    let timestamp = chrono::Utc::now().timestamp();
    post_callback_signed(app, body, job_id, timestamp).await
}

/// POST a callback signed with the credential for `signing_job` at `timestamp`.
pub async fn post_callback_signed(
    app: Router,
    body: serde_json::Value,
    signing_job: JobId,
    timestamp: i64,
) -> Response {
    let bytes = serde_json::to_vec(&body).unwrap();
    let credential = derive_credential(CALLBACK_SECRET, signing_job);
    let signature = sign(&credential, timestamp, &bytes);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/callbacks/progress")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {signature}"))
        .header(TIMESTAMP_HEADER, timestamp.to_string())
        .body(Body::from(bytes))
        .unwrap();
    app.oneshot(request).await.unwrap()
}
