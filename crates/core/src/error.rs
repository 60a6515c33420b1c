// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
///
/// Job-level failures never surface here: they are recorded on the job
/// itself. `AppError` covers store, configuration and API misuse.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-sqlite crate
// by mapping to AppError::Database(String)

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;

    #[test]
    fn test_domain_error_converts() {
        let err: AppError = DomainError::Validation("job type is empty".to_string()).into();
        assert!(matches!(err, AppError::Domain(_)));
        assert!(err.to_string().contains("job type is empty"));
    }
}
