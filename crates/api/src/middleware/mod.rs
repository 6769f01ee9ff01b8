//! Authentication and authorization extractors.
//!
//! - [`auth::AuthUser`] -- Extracts the authenticated user from a JWT Bearer token.
//! - [`rbac::RequireAdmin`] -- Requires the `admin` role; [`rbac::authorize_job`] is the owner check.
//! - [`worker_auth::WorkerAuth`] -- Shared bearer secret on worker heartbeats.
//! - [`callback_auth::SignedCallback`] -- HMAC-signed worker progress callbacks.

pub mod auth;
pub mod callback_auth;
pub mod rbac;
pub mod worker_auth;

/// Strip the `Bearer ` prefix from an `Authorization` header value.
pub(crate) fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
