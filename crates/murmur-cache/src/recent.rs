use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use murmur_types::models::CachedMessage;

use crate::kv::{KvError, KvStore};

/// Bound used by ingestion when pushing into a chat's list.
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// Lifetime of a chat's list, counted from the push that created it.
pub const DEFAULT_MESSAGE_CACHE_TTL: Duration = Duration::from_secs(600);

fn recent_key(chat_id: Uuid) -> String {
    format!("chat:{}:recent", chat_id)
}

/// Most-recent-first list of a chat's latest messages.
///
/// The list never grows past the limit given to [`push`](Self::push). Its
/// expiry is set once, by the push that creates the key, and later pushes
/// leave it alone, so a busy chat's list still lapses `ttl` after it was
/// started and is then rebuilt from the next message onward.
///
/// Push is several single-key operations. Callers must not push to the same
/// chat concurrently; the ingestion pipeline guarantees this by routing each
/// chat to one worker.
#[derive(Clone)]
pub struct RecentCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl RecentCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Prepend `message` and trim the list to `limit` entries. A limit of 0
    /// is treated as 1.
    pub async fn push(
        &self,
        chat_id: Uuid,
        message: &CachedMessage,
        limit: usize,
    ) -> Result<(), KvError> {
        let key = recent_key(chat_id);
        let json = serde_json::to_string(message)?;

        let len = self.kv.push_front(&key, &json).await?;
        self.kv.trim(&key, 0, limit.max(1) - 1).await?;

        // A crash between the push and this call leaves a list with no
        // expiry; the next eviction is then by count only.
        if len == 1 {
            self.kv.expire(&key, self.ttl).await?;
        }
        Ok(())
    }

    /// Up to `limit` cached messages, most recent first.
    pub async fn range(&self, chat_id: Uuid, limit: usize) -> Result<Vec<CachedMessage>, KvError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let raw = self.kv.range(&recent_key(chat_id), 0, limit - 1).await?;
        let messages = raw
            .iter()
            .filter_map(|json| match serde_json::from_str(json) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(chat_id = %chat_id, "Skipping corrupt cached message: {}", e);
                    None
                }
            })
            .collect();
        Ok(messages)
    }

    /// Drop a chat's list entirely, e.g. when the chat is deleted.
    pub async fn clear(&self, chat_id: Uuid) -> Result<bool, KvError> {
        self.kv.delete(&recent_key(chat_id)).await
    }
}
