use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_types::api::{ChatResponse, CreateChatRequest};
use murmur_types::models::{Chat, Role};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    /// Defaults to the caller.
    pub user_id: Option<Uuid>,
}

fn to_response(chat: Chat) -> ChatResponse {
    ChatResponse {
        id: chat.id,
        name: chat.name,
        user_ids: chat.member_ids,
        created_at: chat.created_at,
    }
}

pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<ChatResponse>>> {
    let identity = auth.require()?;
    let username = identity.username.clone();

    let chats = state
        .with_db(move |db| {
            let user_id = match query.user_id {
                Some(id) => id,
                None => match db.get_user_by_username(&username)? {
                    Some(user) => user.id,
                    None => return Ok(Vec::new()),
                },
            };
            db.list_chats_for_user(user_id)
        })
        .await?;

    Ok(Json(chats.into_iter().map(to_response).collect()))
}

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateChatRequest>,
) -> ApiResult<impl IntoResponse> {
    auth.require()?;

    let name = req.name.trim().to_string();
    if !(1..=100).contains(&name.chars().count()) {
        return Err(ApiError::Validation("Chat name must be 1 to 100 characters".into()));
    }

    let chat = Chat {
        id: Uuid::new_v4(),
        name,
        member_ids: req.user_ids,
        created_at: Utc::now(),
    };
    let chat = state.with_db(move |db| db.create_chat(&chat)).await?;

    info!(chat_id = %chat.id, members = chat.member_ids.len(), "Chat created");
    Ok((StatusCode::CREATED, Json(to_response(chat))))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path((chat_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ChatResponse>> {
    auth.require()?;

    let chat = state
        .with_db(move |db| {
            if db.get_chat(chat_id)?.is_none() {
                return Ok(Err(ApiError::NotFound(format!("Chat {} not found", chat_id))));
            }
            if db.get_user_by_id(user_id)?.is_none() {
                return Ok(Err(ApiError::NotFound(format!("User {} not found", user_id))));
            }
            db.add_chat_member(chat_id, user_id)?;
            Ok(db
                .get_chat(chat_id)?
                .ok_or_else(|| ApiError::NotFound(format!("Chat {} not found", chat_id))))
        })
        .await??;

    info!(chat_id = %chat_id, user_id = %user_id, "Member added to chat");
    Ok(Json(to_response(chat)))
}

/// Deletes the chat, its history and its recent-messages list.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<StatusCode> {
    let admin = auth.require_role(Role::Admin)?;

    if !state.with_db(move |db| db.delete_chat(chat_id)).await? {
        return Err(ApiError::NotFound(format!("Chat {} not found", chat_id)));
    }

    // The chat row is already gone; a stale list simply expires on its own.
    if let Err(e) = state.recent.clear(chat_id).await {
        warn!(chat_id = %chat_id, "Failed to clear recent messages: {}", e);
    }

    info!(chat_id = %chat_id, "Chat deleted by {}", admin.username);
    Ok(StatusCode::NO_CONTENT)
}
