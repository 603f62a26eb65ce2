use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Index provisioning timed out: {0}")]
    ProvisionTimeout(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a retry against the same provider can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AppError::ProviderUnavailable(_) | AppError::RateLimited(_) | AppError::Reqwest(_)
        )
    }

    /// Classify an upstream HTTP status into the error taxonomy.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            AppError::RateLimited(context.to_owned())
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            AppError::Auth(context.to_owned())
        } else if status == reqwest::StatusCode::NOT_FOUND {
            AppError::NotFound(context.to_owned())
        } else if status.is_server_error() {
            AppError::ProviderUnavailable(format!("{context}: {status}"))
        } else {
            AppError::InternalError(format!("{context}: unexpected status {status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            AppError::from_status(StatusCode::TOO_MANY_REQUESTS, "embed"),
            AppError::RateLimited(_)
        ));
        assert!(matches!(
            AppError::from_status(StatusCode::UNAUTHORIZED, "cms"),
            AppError::Auth(_)
        ));
        assert!(matches!(
            AppError::from_status(StatusCode::BAD_GATEWAY, "vector"),
            AppError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            AppError::from_status(StatusCode::NOT_FOUND, "entry"),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn test_retriable_partition() {
        assert!(AppError::ProviderUnavailable("down".into()).is_retriable());
        assert!(AppError::RateLimited("429".into()).is_retriable());
        assert!(!AppError::Auth("revoked".into()).is_retriable());
        assert!(!AppError::Validation("bad input".into()).is_retriable());
    }
}
