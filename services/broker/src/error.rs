//! Core error taxonomy.
//!
//! Every component operation returns `Result<_, CoreError>`; the HTTP layer
//! is the only place failures are translated into status codes, and the
//! subscriber protocol surfaces auth revocation as an `authRevoked` event
//! rather than an error response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ov_protocol::ErrorEnvelope;
use ov_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("upstream credentials revoked")]
    AuthRevoked,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("feature disabled: {0}")]
    FeatureDisabled(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("no upstream credentials for tenant")]
    NoCredentials,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    fn status(&self) -> StatusCode {
        match self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidInput(_)
            | CoreError::InvalidTransition(_)
            | CoreError::Conflict(_)
            | CoreError::NoCredentials
            | CoreError::RefreshFailed(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized | CoreError::AuthRevoked => StatusCode::UNAUTHORIZED,
            CoreError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
            CoreError::UpstreamUnavailable(_) | CoreError::Store(_) | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorEnvelope {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
