use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::middleware::auth::AuthError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    KeyNotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("job {0} is still pending")]
    JobPending(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::KeyNotFound(_) => AppError::KeyNotFound(e.to_string()),
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::JobPending(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error, message) = match &self {
            AppError::Auth(e) => ("unauthorized", e.to_string()),
            AppError::KeyNotFound(msg) => ("Key not found", msg.clone()),
            AppError::BadRequest(msg) => ("bad request", msg.clone()),
            AppError::JobPending(_) => ("conflict", self.to_string()),
            AppError::Upstream(e) => {
                tracing::warn!("Upstream error: {}", e);
                ("bad gateway", e.clone())
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                ("internal server error", "internal server error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                ("internal server error", "internal server error".to_string())
            }
        };

        let body = Json(json!({
            "status": status.as_u16(),
            "error": error,
            "message": message,
        }));

        (status, body).into_response()
    }
}
