use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use murmur_types::api::UserResponse;
use murmur_types::models::Role;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthContext;
use crate::state::AppState;

pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    auth.require()?;

    let users = state.with_db(|db| db.list_users()).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<UserResponse>> {
    auth.require()?;

    let user = state
        .with_db(move |db| db.get_user_by_id(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;
    Ok(Json(user.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<StatusCode> {
    let admin = auth.require_role(Role::Admin)?;

    if !state.with_db(move |db| db.delete_user(id)).await? {
        return Err(ApiError::NotFound(format!("User {} not found", id)));
    }

    info!(user_id = %id, "User deleted by {}", admin.username);
    Ok(StatusCode::NO_CONTENT)
}
