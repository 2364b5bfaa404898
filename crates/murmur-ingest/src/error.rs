use thiserror::Error;
use uuid::Uuid;

use murmur_cache::KvError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Chat not found: {0}")]
    ChatNotFound(Uuid),

    #[error("Sender not found: {0}")]
    SenderNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    /// The message was persisted but could not be pushed to the recent list.
    #[error("Message {message_id} persisted but not cached: {source}")]
    Cache {
        message_id: Uuid,
        #[source]
        source: KvError,
    },

    #[error("Topic is closed")]
    TopicClosed,

    #[error("Ingest worker is gone")]
    WorkerGone,

    #[error("Blocking task failed: {0}")]
    Join(String),
}

impl IngestError {
    /// True when the record referenced something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChatNotFound(_) | Self::SenderNotFound(_))
    }
}
