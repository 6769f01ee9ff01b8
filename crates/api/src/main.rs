use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fetchplane_api::config::{DispatchConfig, ProgressConfig, ServerConfig};
use fetchplane_api::engine::callback_dedup::CallbackDedup;
use fetchplane_api::engine::dispatcher::Dispatcher;
use fetchplane_api::engine::progress::{PgSnapshotStore, ProgressHub};
use fetchplane_api::engine::worker_client::HttpWorkerClient;
use fetchplane_api::router::build_app_router;
use fetchplane_api::state::AppState;
use fetchplane_api::{background, ws};
use fetchplane_db::DbPool;
use fetchplane_events::{EventBus, EventPersistence};

const DEFAULT_LOG_FILTER: &str = "fetchplane_api=debug,tower_http=debug";

/// Cap on waiting for a periodic task to notice cancellation.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env();
    let dispatch_config = DispatchConfig::from_env();
    let progress_config = ProgressConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        public_base_url = %config.public_base_url,
        consumers = dispatch_config.consumers,
        max_attempts = dispatch_config.max_attempts,
        "Configuration loaded",
    );

    let pool = connect_database().await;

    let event_bus = Arc::new(EventBus::default());
    let persistence = tokio::spawn(EventPersistence::run(pool.clone(), event_bus.subscribe()));

    let progress_hub = Arc::new(ProgressHub::new(
        Arc::new(PgSnapshotStore::new(pool.clone())),
        Arc::clone(&event_bus),
        progress_config,
    ));
    let worker_client = Arc::new(HttpWorkerClient::new(&dispatch_config));
    let ws_manager = Arc::new(ws::WsManager::new());

    let cancel = CancellationToken::new();

    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        worker_client.clone(),
        Arc::clone(&progress_hub),
        Arc::clone(&event_bus),
        dispatch_config,
        config.callback_secret.clone(),
        config.callback_url(),
    ));
    let consumers = Arc::clone(&dispatcher).spawn(cancel.clone());
    tracing::info!(count = consumers.len(), "Dispatch consumers started");

    let periodic = vec![
        tokio::spawn(background::heartbeat_retention::run(
            pool.clone(),
            config.heartbeat_retention_hours,
            cancel.clone(),
        )),
        tokio::spawn(background::job_expiry::run(
            pool.clone(),
            Arc::clone(&progress_hub),
            Arc::clone(&event_bus),
            config.job_expiry_hours,
            cancel.clone(),
        )),
        tokio::spawn(ws::keepalive::run(Arc::clone(&ws_manager), cancel.clone())),
    ];

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        progress_hub: Arc::clone(&progress_hub),
        event_bus: Arc::clone(&event_bus),
        worker_client,
        callback_dedup: Arc::new(CallbackDedup::default()),
    };
    let app = build_app_router(state, &config);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(%addr, "Control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("HTTP server stopped, shutting down background work");
    cancel.cancel();
    // A consumer finishes the message it holds; anything unacked resurfaces
    // after its lease on the next start.
    join_all(consumers, Duration::from_secs(config.shutdown_timeout_secs)).await;
    join_all(periodic, TASK_STOP_TIMEOUT).await;

    tracing::info!(
        streams = ws_manager.connection_count().await,
        "Closing job streams",
    );
    ws_manager.shutdown_all().await;
    progress_hub.shutdown().await;

    // Persistence exits once the last bus sender is gone.
    drop(dispatcher);
    drop(progress_hub);
    drop(event_bus);
    join_all(vec![persistence], TASK_STOP_TIMEOUT).await;

    tracing::info!("Shutdown complete");
}

/// `RUST_LOG` filter (default [`DEFAULT_LOG_FILTER`]); `LOG_FORMAT=json`
/// switches to one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Connect, verify, and migrate. Any failure aborts startup.
async fn connect_database() -> DbPool {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = fetchplane_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    fetchplane_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    fetchplane_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database ready, migrations applied");
    pool
}

async fn join_all(handles: Vec<JoinHandle<()>>, each: Duration) {
    for handle in handles {
        if tokio::time::timeout(each, handle).await.is_err() {
            tracing::warn!(timeout_secs = each.as_secs(), "Task did not stop in time");
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    };
    tracing::info!(signal, "Graceful shutdown requested");
}
