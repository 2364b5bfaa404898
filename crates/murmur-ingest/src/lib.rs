//! Inbound message ingestion: an in-process topic standing in for the
//! broker, and the worker pool that persists each record and pushes it into
//! the chat's recent-messages list.

pub mod broker;
pub mod error;
pub mod pipeline;
pub mod producer;

pub use broker::{BrokerRecord, Producer, Subscription, consume, topic};
pub use error::IngestError;
pub use pipeline::{IngestionPipeline, PipelineConfig, PipelineStats, Ticket};
pub use producer::MessageProducer;
