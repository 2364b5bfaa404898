use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::kv::{KvError, KvStore};

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        KvError::Backend(e.to_string())
    }
}

/// Redis-backed store shared by every murmur instance. The connection
/// manager reconnects on its own and is cheap to clone per call.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn push_front(&self, key: &str, value: &str) -> Result<usize, KvError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.lpush(key, value).await?;
        Ok(len)
    }

    async fn trim(&self, key: &str, start: usize, stop: usize) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.ltrim(key, start as isize, stop as isize).await?;
        Ok(())
    }

    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, start as isize, stop as isize).await?;
        Ok(values)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let applied: bool = conn.pexpire(key, ttl.as_millis() as i64).await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let mut conn = self.conn.clone();
        // -2: no such key, -1: no expiry
        let ms: i64 = conn.pttl(key).await?;
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }
}
