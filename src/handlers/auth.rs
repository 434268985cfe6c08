use axum::http::{header, HeaderMap};

use crate::errors::AppError;
use crate::models::Identity;
use crate::state::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;
    state.identity.verify(token).await.map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        AppError::Unauthorized
    })
}

/// No header means an anonymous caller; a bad header is still rejected.
pub async fn optional_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Identity>, AppError> {
    if headers.get(header::AUTHORIZATION).is_none() {
        return Ok(None);
    }
    authenticate(state, headers).await.map(Some)
}

pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    let identity = authenticate(state, headers).await?;
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(identity)
}
