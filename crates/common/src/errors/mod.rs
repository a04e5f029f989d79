//! Error types for Chalkline services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling
//!
//! The transition validator raises its own [`TransitionError`] type so callers
//! can branch on kind: an illegal transition is a 409, a missing row is a 404,
//! and a collaborator failure is a 502, never interchangeable.

use crate::transitions::TransitionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,

    // Resource errors (4xxx)
    NotFound,
    BatchNotFound,
    PageNotFound,
    BlockNotFound,
    ContentNotFound,
    ExamQuestionNotFound,
    LessonNotFound,

    // Conflict errors (5xxx)
    Conflict,
    IllegalTransition,
    DuplicateWork,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    VisionError,
    ExtractionError,
    QueueError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::BatchNotFound => 4002,
            ErrorCode::PageNotFound => 4003,
            ErrorCode::BlockNotFound => 4004,
            ErrorCode::ContentNotFound => 4005,
            ErrorCode::ExamQuestionNotFound => 4006,
            ErrorCode::LessonNotFound => 4007,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::IllegalTransition => 5002,
            ErrorCode::DuplicateWork => 5003,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::VisionError => 8002,
            ErrorCode::ExtractionError => 8003,
            ErrorCode::QueueError => 8004,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Batch not found: {id}")]
    BatchNotFound { id: String },

    #[error("Page not found: {id}")]
    PageNotFound { id: String },

    #[error("Block not found: {id}")]
    BlockNotFound { id: String },

    #[error("Approved content not found: {id}")]
    ContentNotFound { id: String },

    #[error("Exam question not found: {id}")]
    ExamQuestionNotFound { id: String },

    #[error("Lesson not found: {name}")]
    LessonNotFound { name: String },

    // Conflict errors
    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),

    #[error("Extraction already {status} for {target} {id}")]
    DuplicateWork {
        target: &'static str,
        id: String,
        status: String,
    },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Vision service error: {message}")]
    VisionError { message: String },

    #[error("Extraction service error: {message}")]
    ExtractionError { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::BatchNotFound { .. } => ErrorCode::BatchNotFound,
            AppError::PageNotFound { .. } => ErrorCode::PageNotFound,
            AppError::BlockNotFound { .. } => ErrorCode::BlockNotFound,
            AppError::ContentNotFound { .. } => ErrorCode::ContentNotFound,
            AppError::ExamQuestionNotFound { .. } => ErrorCode::ExamQuestionNotFound,
            AppError::LessonNotFound { .. } => ErrorCode::LessonNotFound,
            AppError::IllegalTransition(_) => ErrorCode::IllegalTransition,
            AppError::DuplicateWork { .. } => ErrorCode::DuplicateWork,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::VisionError { .. } => ErrorCode::VisionError,
            AppError::ExtractionError { .. } => ErrorCode::ExtractionError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::BatchNotFound { .. }
            | AppError::PageNotFound { .. }
            | AppError::BlockNotFound { .. }
            | AppError::ContentNotFound { .. }
            | AppError::ExamQuestionNotFound { .. }
            | AppError::LessonNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::IllegalTransition(_)
            | AppError::DuplicateWork { .. }
            | AppError::Conflict { .. } => StatusCode::CONFLICT,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::VisionError { .. }
            | AppError::ExtractionError { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::QueueError { .. } | AppError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None, // Should be filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transitions::{validate_transition, BatchStatus};

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::BatchNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::BatchNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_illegal_transition_is_conflict() {
        let inner = validate_transition(BatchStatus::Completed, BatchStatus::Pending).unwrap_err();
        let err = AppError::from(inner);
        assert_eq!(err.code(), ErrorCode::IllegalTransition);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_client_error());
    }

    #[test]
    fn test_duplicate_work_is_conflict() {
        let err = AppError::DuplicateWork {
            target: "approved_content",
            id: "abc".into(),
            status: "PROCESSING".into(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("PROCESSING"));
    }

    #[test]
    fn test_server_error() {
        let err = AppError::Internal {
            message: "Something went wrong".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
    }
}
