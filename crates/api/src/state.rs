use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::callback_dedup::CallbackDedup;
use crate::engine::progress::ProgressHub;
use crate::engine::worker_client::WorkerClient;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: fetchplane_db::DbPool,
    /// Server configuration (secrets, timeouts, retention windows).
    pub config: Arc<ServerConfig>,
    /// Live job stream connections.
    pub ws_manager: Arc<WsManager>,
    /// Per-job progress actors.
    pub progress_hub: Arc<ProgressHub>,
    /// Centralized event bus for publishing platform events.
    pub event_bus: Arc<fetchplane_events::EventBus>,
    /// Outbound start/cancel calls to workers.
    pub worker_client: Arc<dyn WorkerClient>,
    /// Recently seen callback sequence numbers.
    pub callback_dedup: Arc<CallbackDedup>,
}
