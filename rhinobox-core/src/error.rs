//! Single error taxonomy shared by every core component. `rhinobox-server`
//! maps each variant to its fixed status code/error code exactly once.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("request too large: {observed} bytes exceeds maximum of {max} bytes")]
    TooLarge { observed: u64, max: u64 },

    #[error("range not satisfiable for a resource of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("operation timed out")]
    Timeout,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => AppError::Conflict(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("json error: {err}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;
