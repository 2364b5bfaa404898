use tracing::info;

use murmur_types::events::IngestRecord;

use crate::broker::Producer;
use crate::error::IngestError;

/// Publishes chat messages to the ingestion topic, keyed by chat id.
#[derive(Clone)]
pub struct MessageProducer {
    producer: Producer,
}

impl MessageProducer {
    pub fn new(producer: Producer) -> Self {
        Self { producer }
    }

    pub async fn send(&self, record: IngestRecord) -> Result<(), IngestError> {
        let key = record.key();
        let chat_id = record.chat_id;
        let sender_id = record.sender_id;

        self.producer.send(key, record).await?;

        info!(chat_id = %chat_id, sender_id = %sender_id, "Message enqueued for ingestion");
        Ok(())
    }
}
