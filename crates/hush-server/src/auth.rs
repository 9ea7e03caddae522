use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use constant_time_eq::constant_time_eq;

use crate::{error::SharingError, AppState};

/// Gate for the project management routes. Viewer routes stay public, so only
/// the owning workspace's API key is checked here.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, SharingError> {
    if !bearer_matches(request.headers(), &state.api_key) {
        return Err(SharingError::Unauthorized);
    }
    Ok(next.run(request).await)
}

fn bearer_matches(headers: &HeaderMap, api_key: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| constant_time_eq(token.trim().as_bytes(), api_key.as_bytes()))
}
