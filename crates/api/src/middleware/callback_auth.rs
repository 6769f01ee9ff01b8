//! Signature check for worker progress callbacks.
//!
//! The worker signs `{timestamp}.{body}` with the per-job credential it was
//! handed in the start call and sends the hex digest as a bearer token next
//! to an `X-Timestamp` header. The credential is re-derived here from the
//! server secret and the `jobId` in the body, so nothing per-job is stored.
//! Every failure, including an unparseable body, is the same 401.

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use fetchplane_core::callback_auth::{derive_credential, verify, CallbackAuthError, TIMESTAMP_HEADER};
use fetchplane_db::models::callback::ProgressCallback;

use crate::error::AppError;
use crate::state::AppState;

/// A progress callback whose signature has been verified.
#[derive(Debug)]
pub struct SignedCallback(pub ProgressCallback);

impl FromRequest<AppState> for SignedCallback {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let timestamp = req
            .headers()
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or(CallbackAuthError::MalformedTimestamp)?;
        let signature = super::bearer_token(req.headers())
            .map(str::to_owned)
            .ok_or(CallbackAuthError::MalformedSignature)?;

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let callback: ProgressCallback = serde_json::from_slice(&body).map_err(|e| {
            tracing::debug!(error = %e, "Unparseable progress callback body");
            AppError::from(CallbackAuthError::SignatureMismatch)
        })?;

        let credential = derive_credential(&state.config.callback_secret, callback.job_id);
        verify(
            &credential,
            &timestamp,
            &signature,
            &body,
            chrono::Utc::now().timestamp(),
        )?;

        Ok(SignedCallback(callback))
    }
}
