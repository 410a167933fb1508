//! Import configuration

use std::path::PathBuf;

use crate::coerce::CoercionMode;
use crate::error::{IngestError, Result};

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default number of documents per delivered batch.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default number of concurrent batch deliveries.
pub const DEFAULT_WORKERS: usize = 10;

/// Default directory for job snapshots.
pub const DEFAULT_PROGRESS_DIR: &str = "./progress";

/// Default input encoding; a UTF-8 byte-order mark is always accepted.
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Where transformed documents are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    /// Append documents to a JSON Lines file
    JsonLines { path: PathBuf },
    /// Write to a DynamoDB table (requires the `dynamodb` feature)
    DynamoDb {
        region: Option<String>,
        profile: Option<String>,
        endpoint_url: Option<String>,
    },
}

impl SinkConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkConfig::JsonLines { .. } => "jsonl",
            SinkConfig::DynamoDb { .. } => "dynamodb",
        }
    }
}

/// Everything one import run needs
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    pub table_name: String,
    pub input: PathBuf,
    pub schema_file: Option<PathBuf>,
    pub hash_key: Option<String>,
    pub range_key: Option<String>,
    pub batch_size: usize,
    pub workers: usize,
    pub job_id: Option<String>,
    pub progress_dir: PathBuf,
    /// Track and persist job progress
    pub monitor: bool,
    pub encoding: String,
    pub strict: bool,
    pub sink: SinkConfig,
}

impl ImportConfig {
    /// Defaults for everything but the table and input file; documents go to
    /// `<table>.jsonl` in the working directory.
    pub fn new(table_name: impl Into<String>, input: impl Into<PathBuf>) -> Self {
        let table_name = table_name.into();
        let sink = SinkConfig::JsonLines {
            path: PathBuf::from(format!("{table_name}.jsonl")),
        };
        Self {
            table_name,
            input: input.into(),
            schema_file: None,
            hash_key: None,
            range_key: None,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            job_id: None,
            progress_dir: PathBuf::from(DEFAULT_PROGRESS_DIR),
            monitor: true,
            encoding: DEFAULT_ENCODING.to_string(),
            strict: false,
            sink,
        }
    }

    pub fn coercion_mode(&self) -> CoercionMode {
        if self.strict {
            CoercionMode::Strict
        } else {
            CoercionMode::Lenient
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(IngestError::config("Table name cannot be empty"));
        }

        if self.batch_size == 0 {
            return Err(IngestError::config("Batch size must be greater than 0"));
        }

        if self.workers == 0 {
            return Err(IngestError::config("Workers must be greater than 0"));
        }

        if !self.input.is_file() {
            return Err(IngestError::config(format!(
                "Input file not found: {}",
                self.input.display()
            )));
        }

        if let Some(schema) = &self.schema_file {
            if !schema.is_file() {
                return Err(IngestError::config(format!(
                    "Schema file not found: {}",
                    schema.display()
                )));
            }
        }

        if self.batch_size > 25 && matches!(self.sink, SinkConfig::DynamoDb { .. }) {
            tracing::warn!(
                batch_size = self.batch_size,
                "Batches larger than 25 are split into several BatchWriteItem calls"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImportConfig::new("orders", "orders.csv");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.workers, 10);
        assert_eq!(config.progress_dir, PathBuf::from("./progress"));
        assert_eq!(config.encoding, "utf-8");
        assert!(config.monitor);
        assert_eq!(config.coercion_mode(), CoercionMode::Lenient);
        assert_eq!(
            config.sink,
            SinkConfig::JsonLines {
                path: PathBuf::from("orders.jsonl")
            }
        );
    }

    #[test]
    fn test_validate() {
        let input = tempfile::NamedTempFile::new().unwrap();
        let mut config = ImportConfig::new("orders", input.path());
        config.validate().unwrap();

        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
        config.batch_size = 25;

        config.workers = 0;
        assert!(config.validate().is_err());
        config.workers = 1;

        config.schema_file = Some(PathBuf::from("/nonexistent/schema.json"));
        assert!(config.validate().is_err());
        config.schema_file = None;

        config.input = PathBuf::from("/nonexistent/input.csv");
        assert!(config.validate().is_err());
    }
}
