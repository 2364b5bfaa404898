use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::kv::{KvError, KvStore};

enum Value {
    Str(String),
    List(VecDeque<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process key-value store used when no Redis URL is configured, and by
/// tests. Only shared within one process.
///
/// Expired keys are invisible to reads immediately and are physically
/// removed on the next write to the same key or by [`run_expiry_sweep`].
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Drop an expired entry before a write touches the key.
fn evict_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
}

fn inclusive_slice(list: &VecDeque<String>, start: usize, stop: usize) -> Vec<String> {
    if start >= list.len() || start > stop {
        return Vec::new();
    }
    let end = stop.min(list.len() - 1);
    list.range(start..=end).cloned().collect()
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| e.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        Ok(self.entries.read().await.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn push_front(&self, key: &str, value: &str) -> Result<usize, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        evict_expired(&mut entries, key, now);

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value.to_string());
                Ok(list.len())
            }
            Value::Str(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn trim(&self, key: &str, start: usize, stop: usize) -> Result<(), KvError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        evict_expired(&mut entries, key, now);

        let Some(entry) = entries.get_mut(key) else {
            return Ok(());
        };
        let Value::List(list) = &mut entry.value else {
            return Err(KvError::WrongType(key.to_string()));
        };

        let kept = inclusive_slice(list, start, stop);
        if kept.is_empty() {
            entries.remove(key);
        } else {
            *list = kept.into();
        }
        Ok(())
    }

    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::List(list), .. }) => Ok(inclusive_slice(list, start, stop)),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        evict_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at - now))
    }
}

/// Background task that physically removes expired keys so that lists
/// nobody reads again do not accumulate.
pub async fn run_expiry_sweep(kv: Arc<MemoryKv>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);
    info!("In-memory key expiry sweep started");

    loop {
        interval.tick().await;

        let purged = kv.purge_expired().await;
        if purged > 0 {
            debug!("Expiry sweep: dropped {} keys", purged);
        }
    }
}
