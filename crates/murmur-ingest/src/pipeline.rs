use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use murmur_cache::RecentCache;
use murmur_cache::recent::DEFAULT_RECENT_LIMIT;
use murmur_types::events::IngestRecord;
use murmur_types::models::{CachedMessage, ChatMessage};
use murmur_types::store::{ChatStore, IdentityStore, MessageStore, Store};

use crate::error::IngestError;

/// Resolves once the record is acknowledged (persisted and cached) or has
/// failed. Dropping it does not cancel processing.
pub type Ticket = oneshot::Receiver<Result<CachedMessage, IngestError>>;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fixed for the life of the pipeline.
    pub workers: usize,
    /// Records a worker may have queued before `submit` waits. The consumer
    /// is single, so one full worker queue stalls dispatch for every chat
    /// until it drains. Per-chat order is unaffected.
    pub queue_depth: usize,
    /// Bound passed to every recent-list push.
    pub recent_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

struct Job {
    record: IngestRecord,
    done: oneshot::Sender<Result<CachedMessage, IngestError>>,
}

struct WorkerContext {
    store: Arc<dyn Store>,
    cache: RecentCache,
    recent_limit: usize,
    stats: Arc<PipelineStats>,
}

/// Fixed pool of ingest workers with per-chat affinity.
///
/// Every record for a given chat is routed to the same worker, and each
/// worker handles its queue strictly in order. Records for one chat are
/// therefore persisted and cached in the order they were submitted, while
/// different chats proceed in parallel on different workers.
pub struct IngestionPipeline {
    workers: Vec<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

impl IngestionPipeline {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(store: Arc<dyn Store>, cache: RecentCache, config: PipelineConfig) -> Self {
        let worker_count = config.workers.max(1);
        let stats = Arc::new(PipelineStats::default());
        let ctx = Arc::new(WorkerContext {
            store,
            cache,
            recent_limit: config.recent_limit,
            stats: stats.clone(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            workers.push(tx);
            handles.push(tokio::spawn(run_worker(index, rx, ctx.clone())));
        }

        info!(
            "Ingestion pipeline started with {} workers (recent limit {})",
            worker_count, config.recent_limit
        );
        Self {
            workers,
            handles,
            stats,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The worker that owns `chat_id`. Stable for the life of the pipeline.
    pub fn worker_for(&self, chat_id: Uuid) -> usize {
        (chat_id.as_u128() % self.workers.len() as u128) as usize
    }

    /// Queue a record on its chat's worker. Waits if that worker's queue is
    /// full. Submission order is processing order within a chat.
    pub async fn submit(&self, record: IngestRecord) -> Result<Ticket, IngestError> {
        let (done, ticket) = oneshot::channel();
        let worker = &self.workers[self.worker_for(record.chat_id)];
        worker
            .send(Job { record, done })
            .await
            .map_err(|_| IngestError::WorkerGone)?;
        Ok(ticket)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Stop accepting records, let every worker finish its queue, then wait
    /// for them to exit.
    pub async fn shutdown(self) {
        drop(self.workers);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Ingest worker panicked: {}", e);
            }
        }
        info!(
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            "Ingestion pipeline stopped"
        );
    }
}

async fn run_worker(index: usize, mut rx: mpsc::Receiver<Job>, ctx: Arc<WorkerContext>) {
    debug!(worker = index, "Ingest worker started");

    while let Some(Job { record, done }) = rx.recv().await {
        let chat_id = record.chat_id;
        let sender_id = record.sender_id;

        let result = process(&ctx, record).await;
        match &result {
            Ok(_) => {
                ctx.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker = index,
                    chat_id = %chat_id,
                    sender_id = %sender_id,
                    "Failed to ingest message: {}",
                    e
                );
            }
        }

        // Nobody may be waiting for the outcome.
        let _ = done.send(result);
    }

    debug!(worker = index, "Ingest worker stopped");
}

/// Received -> Persisted -> Cached. The cache is only touched once the
/// message is durably stored.
async fn process(ctx: &WorkerContext, record: IngestRecord) -> Result<CachedMessage, IngestError> {
    debug!(chat_id = %record.chat_id, sender_id = %record.sender_id, "Processing message");

    let store = ctx.store.clone();
    let saved = tokio::task::spawn_blocking(move || persist(store.as_ref(), record))
        .await
        .map_err(|e| IngestError::Join(e.to_string()))??;

    let cached = CachedMessage::from(&saved);
    ctx.cache
        .push(saved.chat_id, &cached, ctx.recent_limit)
        .await
        .map_err(|source| IngestError::Cache {
            message_id: saved.id,
            source,
        })?;

    info!(
        chat_id = %saved.chat_id,
        message_id = %saved.id,
        "Message persisted and cached"
    );
    Ok(cached)
}

fn persist(store: &dyn Store, record: IngestRecord) -> Result<ChatMessage, IngestError> {
    store
        .find_chat(record.chat_id)?
        .ok_or(IngestError::ChatNotFound(record.chat_id))?;
    store
        .find_user(record.sender_id)?
        .ok_or(IngestError::SenderNotFound(record.sender_id))?;

    let message = ChatMessage {
        id: Uuid::new_v4(),
        chat_id: record.chat_id,
        sender_id: record.sender_id,
        text: record.text,
        sent_at: Utc::now(),
    };
    store.save_message(&message)?;
    Ok(message)
}
