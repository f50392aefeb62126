use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::services::{auth::AuthError, storage::StoreError, transcode::TransformError};

/// Failure kinds of the gateway core. None of them are retried internally.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object `{0}` already exists")]
    Conflict(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { path } => GatewayError::NotFound(path),
            StoreError::AlreadyExists { path } => GatewayError::Conflict(path),
            other => GatewayError::Store(other),
        }
    }
}

/// A lightweight wrapper for errors leaving the HTTP boundary.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 429 Too Many Requests
    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self {
            retry_after: Some(retry_after_secs),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "too many requests")
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "file not found"),
            GatewayError::Conflict(_) => {
                AppError::new(StatusCode::CONFLICT, "file already exists")
            }
            GatewayError::Validation(msg) => AppError::bad_request(msg),
            GatewayError::Auth(AuthError::Missing) => {
                AppError::new(StatusCode::UNAUTHORIZED, "missing api key")
            }
            GatewayError::Auth(AuthError::Invalid) => {
                AppError::new(StatusCode::FORBIDDEN, "invalid api key")
            }
            GatewayError::Transform(err) => {
                tracing::error!(error = %err, "image transform failed");
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "could not process image")
            }
            GatewayError::Store(err) => {
                tracing::error!(error = %err, "object store request failed");
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
            }
            GatewayError::Internal(err) => AppError::from(err),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "internal error");
        AppError::internal("internal server error")
    }
}
