//! Keepalive pings for open job streams.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Ping every stream each [`PING_INTERVAL`] until `cancel` fires, dropping
/// streams whose socket task has already gone away.
pub async fn run(ws_manager: Arc<WsManager>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(PING_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Stream keepalive stopping");
                break;
            }
            _ = interval.tick() => {
                let pruned = ws_manager.ping_all().await;
                if pruned > 0 {
                    tracing::info!(pruned, "Dropped dead job streams");
                }
            }
        }
    }
}
