use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use murmur_types::api::{MessageResponse, MessageSearchResponse, MessageStatsResponse};
use murmur_types::events::IngestRecord;
use murmur_types::models::CachedMessage;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthContext;
use crate::state::AppState;

const MAX_TEXT_CHARS: usize = 4000;
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub chat_id: Uuid,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub chat_id: Uuid,
    pub keyword: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub chat_id: Uuid,
}

fn default_limit() -> u32 {
    50
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_LIMIT)
}

/// Hands the message to the ingestion topic. Persistence and caching happen
/// asynchronously, so the response only confirms the enqueue.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(record): Json<IngestRecord>,
) -> ApiResult<StatusCode> {
    // The sender id is taken from the body as given, not matched to the caller.
    auth.require()?;

    let len = record.text.trim().chars().count();
    if len == 0 || record.text.chars().count() > MAX_TEXT_CHARS {
        return Err(ApiError::Validation(format!(
            "Message text must be 1 to {} characters",
            MAX_TEXT_CHARS
        )));
    }

    state.producer.send(record).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Persisted history, most recent first.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    auth.require()?;

    let limit = clamp_limit(query.limit);
    let messages = state
        .with_db(move |db| db.get_messages(query.chat_id, limit))
        .await?;
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// The chat's recent-messages list, straight from the cache.
pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<CachedMessage>>> {
    auth.require()?;

    let limit = clamp_limit(query.limit) as usize;
    let messages = state.recent.range(query.chat_id, limit).await?;
    Ok(Json(messages))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<MessageSearchResponse>> {
    auth.require()?;

    let keyword = query.keyword.trim().to_string();
    if keyword.is_empty() {
        return Err(ApiError::Validation("Keyword must not be empty".into()));
    }

    let limit = clamp_limit(query.limit);
    let (messages, total) = state
        .with_db(move |db| db.search_messages(query.chat_id, &keyword, limit))
        .await?;

    Ok(Json(MessageSearchResponse {
        messages: messages.into_iter().map(MessageResponse::from).collect(),
        total,
    }))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<MessageStatsResponse>> {
    auth.require()?;

    let (total_messages, per_sender) = state
        .with_db(move |db| db.message_stats(query.chat_id))
        .await?;

    Ok(Json(MessageStatsResponse {
        total_messages,
        messages_per_user: per_sender.into_iter().collect::<HashMap<_, _>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(clamp_limit(10_000), MAX_LIMIT);
    }
}
