//! Success envelopes. Errors render through [`AppError`](crate::error::AppError).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// `{ "data": T }`, the body of every 2xx JSON response.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// 201 with a [`DataResponse`] body, for resources the request created.
pub struct Created<T: Serialize>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(DataResponse { data: self.0 })).into_response()
    }
}
