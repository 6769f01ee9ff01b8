//! Shared-secret authentication for worker heartbeats.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use fetchplane_core::callback_auth::secrets_match;
use fetchplane_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

/// Marker extractor: the request carried `Authorization: Bearer <secret>`
/// matching `WORKER_HEARTBEAT_SECRET`.
pub struct WorkerAuth;

impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = super::bearer_token(&parts.headers).unwrap_or_default();
        if presented.is_empty()
            || !secrets_match(&state.config.worker_heartbeat_secret, presented)
        {
            return Err(AppError::Core(CoreError::Unauthorized(
                "Invalid worker credentials".into(),
            )));
        }
        Ok(WorkerAuth)
    }
}
