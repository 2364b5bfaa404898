use tokio::sync::mpsc;
use tracing::{error, info};

use murmur_types::events::IngestRecord;

use crate::error::IngestError;
use crate::pipeline::IngestionPipeline;

/// A keyed record on the topic.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    pub key: String,
    pub value: IngestRecord,
}

/// Create a topic with room for `capacity` undelivered records.
///
/// The topic is one FIFO with a single subscription, so records are
/// delivered in the order they were sent, which in particular preserves
/// order per key.
pub fn topic(capacity: usize) -> (Producer, Subscription) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Producer { tx }, Subscription { rx })
}

#[derive(Clone)]
pub struct Producer {
    tx: mpsc::Sender<BrokerRecord>,
}

impl Producer {
    /// Waits for space when the topic is full.
    pub async fn send(&self, key: String, value: IngestRecord) -> Result<(), IngestError> {
        self.tx
            .send(BrokerRecord { key, value })
            .await
            .map_err(|_| IngestError::TopicClosed)
    }
}

pub struct Subscription {
    rx: mpsc::Receiver<BrokerRecord>,
}

impl Subscription {
    /// `None` once every producer is dropped and the backlog is drained.
    pub async fn next(&mut self) -> Option<BrokerRecord> {
        self.rx.recv().await
    }
}

/// Consumer loop: hand every delivered record to the pipeline, in delivery
/// order. When the topic closes, drain the workers and return.
///
/// Outcomes are reported by the workers; this loop only dispatches. A full
/// worker queue holds up the whole loop, not just that worker's chats.
pub async fn consume(mut subscription: Subscription, pipeline: IngestionPipeline) {
    info!("Ingest consumer started");

    while let Some(record) = subscription.next().await {
        if let Err(e) = pipeline.submit(record.value).await {
            error!(key = %record.key, "Could not dispatch record: {}", e);
            break;
        }
    }

    info!("Topic closed, draining ingest workers");
    pipeline.shutdown().await;
}
