//! Who may touch what.
//!
//! Two rules: operator console routes need the `admin` role, and a job is
//! visible to its owner and to admins.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use fetchplane_core::error::CoreError;
use fetchplane_core::types::DbId;

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Extractor for operator routes (DLQ, job overrides, fleet). 403 otherwise.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.is_admin() {
            return Ok(RequireAdmin(user));
        }
        tracing::warn!(
            user_id = user.user_id,
            path = %parts.uri.path(),
            "Operator route refused for non-admin",
        );
        Err(AppError::Core(CoreError::Forbidden(
            "Admin role required".into(),
        )))
    }
}

/// Owner-or-admin check for a single job. `action` names the attempted
/// verb in the error ("view", "cancel", "watch").
pub fn authorize_job(auth: &AuthUser, owner_id: DbId, action: &str) -> Result<(), AppError> {
    if auth.user_id == owner_id || auth.is_admin() {
        return Ok(());
    }
    Err(AppError::Core(CoreError::Forbidden(format!(
        "Cannot {action} another user's job"
    ))))
}
