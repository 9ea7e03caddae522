use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failures surfaced by the secret-sharing lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SharingError {
    #[error("Path (/{0}) already taken")]
    PathAlreadyTaken(String),

    /// Missing, expired and already-consumed shares all map here so callers
    /// cannot tell them apart.
    #[error("secret is invalid or has expired")]
    InvalidOrExpiredSecret,

    #[error("secret sharing not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid API key")]
    Unauthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SharingError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PathAlreadyTaken(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidOrExpiredSecret | Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Malformed request bodies answer like any other validation failure.
impl From<JsonRejection> for SharingError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for SharingError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal server error".to_owned()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
