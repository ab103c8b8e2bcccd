use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::chat::unix_seconds;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Session absent, expired or ended. Callers cannot tell which.
    #[error("{0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider timeout: {0}")]
    ProviderTimeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Uniform outcome for every missing/expired/ended session.
    pub fn session_not_found(session_id: &str) -> Self {
        ApiError::NotFound(format!("Session {} not found or expired", session_id))
    }

    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::ProviderError(_) => "PROVIDER_ERROR",
            ApiError::ProviderTimeout(_) => "PROVIDER_TIMEOUT",
            ApiError::Configuration(_) => "CONFIGURATION_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::ProviderError(_) | ApiError::ProviderTimeout(_))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::ProviderError(_) => StatusCode::BAD_GATEWAY,
            ApiError::ProviderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Configuration(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    timestamp: f64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::NotFound(msg) | ApiError::Validation(msg) => {
                tracing::warn!("{}: {}", self.kind(), msg);
            }
            ApiError::ProviderError(msg) | ApiError::ProviderTimeout(msg) => {
                tracing::warn!("{}: {}", self.kind(), msg);
            }
            ApiError::Configuration(msg) | ApiError::Internal(msg) => {
                tracing::error!("{}: {}", self.kind(), msg);
            }
        }

        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            // Internal details stay in the log
            message: match &self {
                ApiError::Internal(_) => "Internal server error".to_string(),
                other => other.to_string(),
            },
            timestamp: unix_seconds(chrono::Utc::now()),
        });

        (status, body).into_response()
    }
}
