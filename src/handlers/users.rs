use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::auth::authenticate;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::UserProfile;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub display_name: String,
}

// PUT /api/users/me
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    let name = body.display_name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("displayName is required".to_string()));
    }

    let profile = queries::save_user_profile(
        state.store.as_ref(),
        &caller.uid,
        name,
        caller.email.as_deref(),
    )
    .await?;
    Ok(Json(profile))
}
