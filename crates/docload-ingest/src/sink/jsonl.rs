//! JSON Lines export sink
//!
//! Appends each document as one line in typed JSON form. Useful for dry runs
//! and for staging an import on disk.

use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_jsonlines::JsonLinesWriter;
use tracing::{debug, warn};

use super::{BatchSink, SinkError};
use crate::dispatch::BatchOutcome;
use crate::document::Document;

pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<JsonLinesWriter<BufWriter<File>>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SinkError::Fatal(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::Fatal(format!("Cannot open {}: {e}", path.display())))?;

        Ok(Self {
            path,
            writer: Mutex::new(JsonLinesWriter::new(BufWriter::new(file))),
        })
    }
}

#[async_trait]
impl BatchSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn deliver(&self, batch: &[Document]) -> Result<BatchOutcome, SinkError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SinkError::Fatal("jsonl writer lock poisoned".to_string()))?;

        let mut outcome = BatchOutcome::default();
        for doc in batch {
            match writer.write(doc) {
                Ok(()) => outcome.success_count += 1,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to write document");
                    outcome.failure_count += 1;
                },
            }
        }

        writer
            .flush()
            .map_err(|e| SinkError::Unavailable(format!("Flush failed: {e}")))?;
        debug!(
            path = %self.path.display(),
            written = outcome.success_count,
            "Wrote batch"
        );
        Ok(outcome)
    }
}
