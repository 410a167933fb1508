//! Batch sinks
//!
//! A sink accepts one batch of documents and reports how many items were
//! stored. Per-item problems belong in the returned [`BatchOutcome`]; an
//! `Err` means the batch as a whole never reached the store.

use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::BatchOutcome;
use crate::document::Document;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod jsonl;

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoDbSink;
pub use jsonl::JsonLinesSink;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The batch could not be delivered; every item counts as failed
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The sink cannot continue; the job is aborted
    #[error("Fatal sink error: {0}")]
    Fatal(String),
}

/// Delivery capability for batches of documents
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Deliver one batch, preserving item order.
    async fn deliver(&self, batch: &[Document]) -> Result<BatchOutcome, SinkError>;
}
