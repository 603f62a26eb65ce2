use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            // The tenant must run the authorization handshake again.
            AppError::Auth(msg) => {
                Self::Unauthorized(format!("{msg}; re-authorize the stack to continue"))
            }
            AppError::ProviderUnavailable(msg) | AppError::ProvisionTimeout(msg) => {
                Self::Unavailable(msg)
            }
            AppError::RateLimited(msg) => Self::RateLimited(msg),
            other => {
                tracing::error!("Internal error: {:?}", other);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            Self::RateLimited(message) => (StatusCode::TOO_MANY_REQUESTS, message),
        };

        let body = ErrorResponse {
            error: message,
            status: "error".to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn test_app_error_mapping() {
        assert!(matches!(
            ApiError::from(AppError::NotFound("missing".into())),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::Validation("bad".into())),
            ApiError::ValidationError(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::ProviderUnavailable("down".into())),
            ApiError::Unavailable(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::RateLimited("slow down".into())),
            ApiError::RateLimited(_)
        ));
    }

    #[test]
    fn test_auth_mapping_carries_reauthorize_hint() {
        let err = ApiError::from(AppError::Auth("stack s requires re-authorization".into()));
        match &err {
            ApiError::Unauthorized(msg) => assert!(msg.contains("re-authorize")),
            other => panic!("unexpected mapping: {other:?}"),
        }
        assert_eq!(status_of(err), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(ApiError::InternalError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ApiError::ValidationError("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ApiError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ApiError::Unavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::RateLimited("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_internal_error_is_sanitized() {
        let err = ApiError::from(AppError::InternalError("db password incorrect".into()));
        assert_eq!(err.to_string(), "Internal server error");
    }
}
