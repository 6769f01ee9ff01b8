use axum::routing::post;
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`. Authenticated by the shared heartbeat secret.
///
/// ```text
/// POST   /heartbeat       -> heartbeat
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/heartbeat", post(workers::heartbeat))
}
