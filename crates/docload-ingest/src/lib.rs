//! Docload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Turns tabular text records into typed, possibly nested documents and
//! delivers them to a key-value store in bounded batches.
//!
//! # Pipeline
//!
//! - **Source**: [`source::CsvRecordSource`] yields flat records, falling back
//!   to a single-byte encoding when the file is not valid UTF-8
//! - **Transform**: [`transform::Transformer`] maps each record through the
//!   declarative [`schema::SchemaMapping`], coercing values with [`coerce`]
//! - **Dispatch**: [`dispatch::BatchDispatcher`] groups documents into batches
//!   and delivers them to a [`sink::BatchSink`] with bounded concurrency
//! - **Progress**: [`progress::ProgressTracker`] keeps a persisted job snapshot
//!   that observers can poll
//!
//! # Example
//!
//! ```no_run
//! use docload_ingest::{config::ImportConfig, pipeline};
//!
//! # async fn run(config: ImportConfig) -> anyhow::Result<()> {
//! let summary = pipeline::import(&config).await?;
//! println!("{} imported, {} failed", summary.successful, summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod coerce;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod sink;
pub mod source;
pub mod transform;

// Re-export commonly used types
pub use document::{AttributeValue, Document};
pub use error::{IngestError, Result};
