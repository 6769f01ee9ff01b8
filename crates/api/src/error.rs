use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use fetchplane_core::callback_auth::CallbackAuthError;
use fetchplane_core::error::CoreError;
use fetchplane_core::status::UnknownStatus;
use fetchplane_db::error::{JobStoreError, ReplayError};

use crate::engine::progress::ProgressError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `fetchplane_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<JobStoreError> for AppError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::DuplicateSubmission { .. }
            | JobStoreError::InvalidTransition(_)
            | JobStoreError::AlreadyAssigned { .. } => {
                tracing::info!(error = %err, "Job state conflict");
                AppError::Core(CoreError::Conflict(err.to_string()))
            }
            JobStoreError::NotFound(id) => AppError::Core(CoreError::not_found_by("Job", id)),
            JobStoreError::UnknownStatus(e) => AppError::InternalError(e.to_string()),
            JobStoreError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<ReplayError> for AppError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::NoPendingEntry(id) => {
                AppError::Core(CoreError::not_found_by("Pending DLQ entry for job", id))
            }
            ReplayError::Store(e) => e.into(),
        }
    }
}

impl From<CallbackAuthError> for AppError {
    fn from(err: CallbackAuthError) -> Self {
        // The caller learns nothing about which check failed.
        tracing::warn!(error = %err, "Rejected progress callback");
        AppError::Core(CoreError::Unauthorized("Invalid callback signature".into()))
    }
}

impl From<UnknownStatus> for AppError {
    fn from(err: UnknownStatus) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<ProgressError> for AppError {
    fn from(err: ProgressError) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(err.to_string()))
    }
}

type Rendered = (StatusCode, &'static str, String);

fn internal() -> Rendered {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Renders `{ "error": <message>, "code": <CODE> }`. Internal details are
/// logged, never returned.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(CoreError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
            ),
            AppError::Core(CoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Core(CoreError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone())
            }
            AppError::Core(CoreError::Unauthorized(msg)) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::Core(CoreError::Forbidden(msg)) => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Database(err) => classify_sqlx_error(err),
            AppError::Core(CoreError::Internal(msg)) | AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        (status, axum::Json(json!({ "error": message, "code": code }))).into_response()
    }
}

/// 404 for `RowNotFound`, 409 for a unique violation on one of the `uq_*`
/// constraints, 500 otherwise.
fn classify_sqlx_error(err: &sqlx::Error) -> Rendered {
    if let sqlx::Error::RowNotFound = err {
        return (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        );
    }
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            if let Some(message) = db_err.constraint().and_then(conflict_message) {
                return (StatusCode::CONFLICT, "CONFLICT", message);
            }
        }
    }
    tracing::error!(error = %err, "Database error");
    internal()
}

fn conflict_message(constraint: &str) -> Option<String> {
    match constraint {
        "uq_workers_name" => Some("A worker with this name is already registered".into()),
        "uq_dlq_entries_pending_job" => {
            Some("Job already has a pending dead-letter entry".into())
        }
        other if other.starts_with("uq_") => {
            Some(format!("Duplicate value violates unique constraint: {other}"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchplane_core::job_state::InvalidTransition;
    use fetchplane_db::models::status::JobStatus;

    #[test]
    fn store_conflicts_map_to_409() {
        let err: AppError = JobStoreError::InvalidTransition(InvalidTransition {
            from: JobStatus::Downloading,
            to: JobStatus::Queued,
        })
        .into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let err: AppError = JobStoreError::DuplicateSubmission {
            existing: uuid::Uuid::nil(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn missing_job_maps_to_404() {
        let err: AppError = JobStoreError::NotFound(uuid::Uuid::nil()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: AppError = ReplayError::NoPendingEntry(uuid::Uuid::nil()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn named_constraints_get_readable_conflicts() {
        assert_eq!(
            conflict_message("uq_dlq_entries_pending_job").as_deref(),
            Some("Job already has a pending dead-letter entry")
        );
        assert!(conflict_message("uq_job_statuses_name").is_some());
        assert!(conflict_message("fk_jobs_status").is_none());
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = AppError::InternalError("snapshot actor mailbox closed".into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn every_callback_auth_failure_is_401() {
        for failure in [
            CallbackAuthError::MalformedTimestamp,
            CallbackAuthError::Expired,
            CallbackAuthError::MalformedSignature,
            CallbackAuthError::SignatureMismatch,
        ] {
            let err: AppError = failure.into();
            assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
        }
    }
}
