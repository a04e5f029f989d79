//! Vision worker error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Vision service error: {0}")]
    VisionFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Malformed job message: {0}")]
    BadMessage(String),
}

impl OcrError {
    /// Whether redelivering the message could succeed. Malformed messages
    /// never will; everything else is a transient dependency failure.
    pub fn retryable(&self) -> bool {
        !matches!(self, OcrError::BadMessage(_))
    }
}

impl From<chalkline_common::errors::AppError> for OcrError {
    fn from(e: chalkline_common::errors::AppError) -> Self {
        use chalkline_common::errors::AppError;
        match e {
            AppError::VisionError { message } => OcrError::VisionFailed(message),
            AppError::QueueError { message } => OcrError::QueueError(message),
            other => OcrError::DatabaseError(other.to_string()),
        }
    }
}
