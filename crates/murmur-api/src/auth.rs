use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};

use murmur_types::api::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse, UserResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let name_len = username.chars().count();
    if !(3..=50).contains(&name_len) {
        return Err(ApiError::Validation("Username must be 3 to 50 characters".into()));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::Validation("Password must be at least 8 characters".into()));
    }
    if !req.email.contains('@') {
        return Err(ApiError::Validation("Email address is invalid".into()));
    }

    let principal = state
        .sessions
        .register(username, req.password, req.email.trim().to_string())
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(principal))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let pair = state.sessions.login(req.username.trim(), &req.password).await?;

    Ok(Json(TokenResponse {
        access_token: Some(pair.access_token),
        refresh_token: Some(pair.refresh_token),
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let response = state.sessions.refresh(&req.refresh_token).await?;
    Ok(Json(response))
}

/// Revokes the access token presented in the `Authorization` header.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Auth("Missing authorization header".into()))?;

    state.sessions.logout(authorization).await?;
    Ok(StatusCode::OK)
}
