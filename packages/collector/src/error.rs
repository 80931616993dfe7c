use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

/// Application-specific error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Invalid endpoint identifier: {0}")]
    InvalidEndpointId(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Endpoint capacity exceeded: ceiling of {0} live endpoints reached")]
    CapacityExceeded(usize),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::EndpointNotFound => StatusCode::NOT_FOUND,
            AppError::InvalidEndpointId(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::CapacityExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_code = match self {
            AppError::EndpointNotFound => "endpoint_not_found",
            AppError::InvalidEndpointId(_) => "invalid_endpoint_id",
            AppError::PayloadTooLarge { .. } => "payload_too_large",
            AppError::RateLimitExceeded(_) => "rate_limit_exceeded",
            AppError::CapacityExceeded(_) => "capacity_exceeded",
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_code.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        })
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
