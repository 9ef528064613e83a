//! Crate-wide error taxonomy.
//!
//! `AppError` variants map 1:1 to the wire codes in the specification's
//! error-handling section. Anything that is not one of those named failure
//! modes folds to `INTERNAL_ERROR` / 500, matching the "top-level guard that
//! logs and returns INTERNAL_ERROR" policy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("signature timestamp expired")]
    SignatureTimestampExpired,
    #[error("invalid signature")]
    InvalidSignature,

    #[error("instance not found")]
    InstanceNotFound,
    #[error("instance not active")]
    InstanceNotActive,

    #[error("token signing failed: {0}")]
    TokenSignFailed(String),
    #[error("jwks parse error: {0}")]
    JwksParseError(String),

    #[error("request timed out")]
    RequestTimeout,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unaccepted response: {0}")]
    UnacceptedResponse(String),

    #[error("queue send failed: {0}")]
    QueueSendFailed(String),
    #[error("retry schedule failed")]
    RetryScheduleFailed,
    #[error("max retry attempts exceeded")]
    MaxAttemptsExceeded,
    #[error("dlq reached")]
    DlqReached,

    #[error(transparent)]
    Store(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The wire code used in both HTTP error envelopes and `last_error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::SignatureTimestampExpired => "SIGNATURE_TIMESTAMP_EXPIRED",
            AppError::InvalidSignature => "INVALID_SIGNATURE",
            AppError::InstanceNotFound => "INSTANCE_NOT_FOUND",
            AppError::InstanceNotActive => "INSTANCE_NOT_ACTIVE",
            AppError::TokenSignFailed(_) => "TOKEN_SIGN_FAILED",
            AppError::JwksParseError(_) => "JWKS_PARSE_ERROR",
            AppError::RequestTimeout => "REQUEST_TIMEOUT",
            AppError::RequestFailed(_) => "REQUEST_FAILED",
            AppError::UnacceptedResponse(_) => "UNACCEPTED_RESPONSE",
            AppError::QueueSendFailed(_) => "QUEUE_SEND_FAILED",
            AppError::RetryScheduleFailed => "RETRY_SCHEDULE_FAILED",
            AppError::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
            AppError::DlqReached => "DLQ_REACHED",
            AppError::Store(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::SignatureTimestampExpired | AppError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            AppError::InstanceNotFound => StatusCode::NOT_FOUND,
            AppError::InstanceNotActive => StatusCode::BAD_REQUEST,
            AppError::JwksParseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct Envelope {
    ok: bool,
    error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Store(_) | AppError::Internal(_)) {
            tracing::error!(error = %self, "internal_error");
        } else {
            tracing::warn!(error = %self, code = self.code(), "request_error");
        }
        let status = self.status();
        let body = Envelope {
            ok: false,
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
