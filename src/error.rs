/*
 * Responsibility
 * - HTTP 面のエラーのみ (ボディのデコード, middleware)
 * - IntoResponse 実装 (HTTP status / JSON error body)
 * - 認可の失敗は AppError にしない (Deny 判定になる)
 */
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tower::BoxError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    // Status follows the rejection: 400 syntax, 415 content type, 422 shape
    #[error("invalid request: {message}")]
    InvalidRequest { status: StatusCode, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("internal server error")]
    Internal,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl AppError {
    /// Maps errors raised by the tower layers (timeout, ...).
    pub fn from_middleware(err: BoxError) -> Self {
        if err.is::<tower::timeout::error::Elapsed>() {
            Self::Timeout
        } else {
            tracing::error!(error = %err, "unhandled middleware error");
            Self::Internal
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidRequest { status, message } => (status, "INVALID_REQUEST", message),
            AppError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "REQUEST_TIMEOUT",
                "request timed out".into(),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "internal server error".into(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}
