use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use murmur_cache::KvError;
use murmur_ingest::IngestError;
use murmur_types::api::ErrorResponse;

use crate::session::AuthError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// A rejected auth operation: bad credentials, taken username, bad token.
    #[error("{0}")]
    Auth(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Auth(_) => (StatusCode::BAD_REQUEST, "AUTH_ERROR"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "AUTH_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Internal(detail) => {
                error!("Request failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::DuplicateUsername | AuthError::InvalidCredential | AuthError::InvalidToken => {
                ApiError::Auth(e.to_string())
            }
            AuthError::NotFound(_) => ApiError::NotFound(e.to_string()),
            AuthError::Token(_) | AuthError::Store(_) | AuthError::Cache(_) | AuthError::Hashing(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl From<KvError> for ApiError {
    fn from(e: KvError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_bad_requests() {
        let response = ApiError::from(AuthError::InvalidCredential).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(AuthError::NotFound("bob".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.to_string(), "Internal server error");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
