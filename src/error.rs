//! Error type shared by every service boundary.

use thiserror::Error;

/// Failure categories surfaced by the data, strategy, portfolio and
/// execution services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Optimistic version check failed on save.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Transient upstream failure (transport error, 5xx, throttling).
    /// Retried by the data layer and reported as `Internal` once retries run out.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Short status code, used in logs and batch error maps.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ServiceError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            ServiceError::FailedPrecondition(_) => "FAILED_PRECONDITION",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            ServiceError::Internal(_) => "INTERNAL",
            ServiceError::Unavailable(_) => "UNAVAILABLE",
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServiceError::Internal(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ServiceError::InvalidArgument(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }

    /// Collapse transient failures into `Internal` at service boundaries.
    pub fn settle(self) -> Self {
        match self {
            ServiceError::Unavailable(msg) => ServiceError::Internal(msg),
            other => other,
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Internal(format!("storage: {}", err))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Internal(format!("decode: {}", err))
        } else {
            ServiceError::Unavailable(format!("transport: {}", err))
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("decode: {}", err))
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
