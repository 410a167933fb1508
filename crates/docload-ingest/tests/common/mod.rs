//! Shared helpers for docload-ingest integration tests
//!
//! - [`RecordingSink`] keeps every delivered batch in memory and can be told
//!   to fail particular documents or whole batches
//! - [`write_file`] drops fixture files into a temp directory

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use docload_ingest::dispatch::BatchOutcome;
use docload_ingest::sink::{BatchSink, SinkError};
use docload_ingest::{AttributeValue, Document};

type ItemPredicate = Box<dyn Fn(&Document) -> bool + Send + Sync>;

#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<Document>>>,
    fail_item: Option<ItemPredicate>,
    unavailable: bool,
    fatal: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report items matching `predicate` as failed.
    pub fn failing_items(predicate: impl Fn(&Document) -> bool + Send + Sync + 'static) -> Self {
        Self {
            fail_item: Some(Box::new(predicate)),
            ..Self::default()
        }
    }

    /// Reject every batch as unreachable.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Reject every batch with an unrecoverable error.
    pub fn fatal() -> Self {
        Self {
            fatal: true,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<Document>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, batch: &[Document]) -> Result<BatchOutcome, SinkError> {
        tokio::task::yield_now().await;
        self.batches.lock().unwrap().push(batch.to_vec());

        if self.fatal {
            return Err(SinkError::Fatal("table does not exist".into()));
        }
        if self.unavailable {
            return Err(SinkError::Unavailable("recording sink offline".into()));
        }
        let failed = match &self.fail_item {
            Some(predicate) => batch.iter().filter(|doc| predicate(doc)).count(),
            None => 0,
        };
        Ok(BatchOutcome::new(batch.len() - failed, failed))
    }
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Document with a single string `id` field.
pub fn doc(id: impl Into<String>) -> Document {
    let mut doc = Document::new();
    doc.insert("id".to_string(), AttributeValue::S(id.into()));
    doc
}
