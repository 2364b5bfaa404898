use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound chat message as it travels through the broker topic.
/// Records are keyed by `chat_id` so that one conversation's records stay
/// in delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRecord {
    #[serde(alias = "conversationId")]
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
}

impl IngestRecord {
    /// Broker partition key.
    pub fn key(&self) -> String {
        self.chat_id.to_string()
    }
}
