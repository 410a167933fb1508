//! Error types for the ingest pipeline
//!
//! Only configuration, source and fatal sink errors end a job. Per-record
//! and per-batch problems are folded into failure counters instead and never
//! surface here.

use docload_common::DocloadError;
use thiserror::Error;

use crate::dispatch::DispatchAborted;
use crate::schema::SchemaError;
use crate::sink::SinkError;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Dispatch(#[from] DispatchAborted),

    #[error("Progress tracking error: {0}")]
    Progress(#[from] DocloadError),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        IngestError::Config(msg.into())
    }
}
