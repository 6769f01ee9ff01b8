use axum::routing::post;
use axum::Router;

use crate::handlers::callbacks;
use crate::state::AppState;

/// Routes mounted at `/callbacks`. Authenticated by request signature,
/// not by access token.
///
/// ```text
/// POST   /progress        -> progress_callback
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/progress", post(callbacks::progress_callback))
}
