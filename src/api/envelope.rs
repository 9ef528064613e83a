//! Enforces the `{ok, data?, error?}` wire shape (§6) structurally rather
//! than by handler-by-handler convention. Error responses go through
//! `AppError`'s own `IntoResponse`; this wraps the success side.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    ok: bool,
    data: T,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self { ok: true, data }
    }
}

impl<T: Serialize> IntoResponse for ApiEnvelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
