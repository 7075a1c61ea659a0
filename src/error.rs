use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Storage(anyhow::Error),
    /// Backend unreachable or timed out. Retryable.
    TransportFailure(String),
    /// Every chunk query of a feed assembly failed. Retryable.
    FeedUnavailable(String),
    /// An engagement write failed after the local mutation; local state has
    /// already been reverted when this is returned.
    OptimisticWriteFailed(String),
    EntityNotFound(String),
    InvalidQuery(String),
    Validation(String),
    Serialization(String),
    Configuration(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransportFailure(_) | AppError::FeedUnavailable(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Storage(err) => write!(f, "Storage error: {}", err),
            AppError::TransportFailure(msg) => write!(f, "Transport failure: {}", msg),
            AppError::FeedUnavailable(msg) => write!(f, "Feed unavailable: {}", msg),
            AppError::OptimisticWriteFailed(msg) => write!(f, "Optimistic write failed: {}", msg),
            AppError::EntityNotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Storage(err) => {
                tracing::error!("Storage error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::TransportFailure(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::FeedUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::OptimisticWriteFailed(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::EntityNotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Serialization(msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Configuration(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "retryable": self.is_retryable(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Storage(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                AppError::TransportFailure(err.to_string())
            }
            sqlx::Error::Database(ref db) if is_lock_contention(db.code().as_deref()) => {
                AppError::TransportFailure(err.to_string())
            }
            other => AppError::Storage(anyhow::Error::new(other)),
        }
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes
fn is_lock_contention(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
