use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Key-value backend error: {0}")]
    Backend(String),

    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("Failed to encode or decode a cached value: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Single-key operations against a shared key-value backend.
///
/// Every call is atomic on its own; nothing spans keys. List operations
/// follow Redis semantics: index 0 is the head, ranges are inclusive, and a
/// list trimmed to nothing ceases to exist.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Overwrites any previous value and clears its expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Prepend to a list, creating it if needed. Returns the new length, so
    /// a result of 1 means this push created the key.
    async fn push_front(&self, key: &str, value: &str) -> Result<usize, KvError>;

    /// Keep only `start..=stop`.
    async fn trim(&self, key: &str, start: usize, stop: usize) -> Result<(), KvError>;

    /// Elements `start..=stop`, clamped to the list length.
    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, KvError>;

    /// Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Remaining lifetime, or `None` if the key is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;
}
