//! Command-line interface
//!
//! Flags override `DOCLOAD_*` environment variables, which override the
//! built-in defaults in [`crate::config`].

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use docload_common::job::{JobState, JobStatus};

use crate::config::{
    ImportConfig, SinkConfig, DEFAULT_BATCH_SIZE, DEFAULT_ENCODING, DEFAULT_PROGRESS_DIR,
    DEFAULT_WORKERS,
};

/// Docload - load CSV records into a key-value store as typed documents
#[derive(Parser, Debug)]
#[command(name = "docload")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a CSV file
    Import(ImportArgs),

    /// Check a schema against the first row of a CSV file without importing
    Validate(ValidateArgs),

    /// Show the progress of import jobs
    Status(StatusArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Append documents to a JSON Lines file
    Jsonl,
    /// Write to a DynamoDB table
    Dynamodb,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Target table name
    #[arg(long)]
    pub table: String,

    /// Path to the CSV file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Path to the JSON schema mapping file
    #[arg(short, long)]
    pub schema: Option<PathBuf>,

    /// Name of the hash key (overrides the schema)
    #[arg(long)]
    pub hash_key: Option<String>,

    /// Name of the range key (overrides the schema)
    #[arg(long)]
    pub range_key: Option<String>,

    /// Documents per batch
    #[arg(long, env = "DOCLOAD_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Concurrent batch deliveries
    #[arg(long, env = "DOCLOAD_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Where documents are delivered
    #[arg(long, value_enum, env = "DOCLOAD_SINK", default_value_t = SinkKind::Jsonl)]
    pub sink: SinkKind,

    /// Output file for the jsonl sink (defaults to <table>.jsonl)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// AWS region
    #[arg(long)]
    pub region: Option<String>,

    /// AWS profile name
    #[arg(long)]
    pub profile: Option<String>,

    /// Custom DynamoDB endpoint (e.g. a local emulator)
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Custom job ID for progress tracking
    #[arg(long)]
    pub job_id: Option<String>,

    /// Directory for job progress snapshots
    #[arg(long, env = "DOCLOAD_PROGRESS_DIR", default_value = DEFAULT_PROGRESS_DIR)]
    pub progress_dir: PathBuf,

    /// Disable progress tracking
    #[arg(long)]
    pub no_monitor: bool,

    /// CSV file encoding; falls back to windows-1252 on invalid input
    #[arg(long, env = "DOCLOAD_ENCODING", default_value = DEFAULT_ENCODING)]
    pub encoding: String,

    /// Reject records with unparseable values or missing columns
    #[arg(long)]
    pub strict: bool,
}

impl ImportArgs {
    pub fn into_config(self) -> ImportConfig {
        let mut config = ImportConfig::new(self.table, self.file);

        config.sink = match self.sink {
            SinkKind::Jsonl => SinkConfig::JsonLines {
                path: self
                    .output
                    .unwrap_or_else(|| PathBuf::from(format!("{}.jsonl", config.table_name))),
            },
            SinkKind::Dynamodb => SinkConfig::DynamoDb {
                region: self.region,
                profile: self.profile,
                endpoint_url: self.endpoint_url,
            },
        };
        config.schema_file = self.schema;
        config.hash_key = self.hash_key;
        config.range_key = self.range_key;
        config.batch_size = self.batch_size;
        config.workers = self.workers;
        config.job_id = self.job_id;
        config.progress_dir = self.progress_dir;
        config.monitor = !self.no_monitor;
        config.encoding = self.encoding;
        config.strict = self.strict;
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Path to the CSV file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Path to the schema file
    #[arg(short, long)]
    pub schema: PathBuf,

    /// CSV file encoding
    #[arg(long, env = "DOCLOAD_ENCODING", default_value = DEFAULT_ENCODING)]
    pub encoding: String,

    /// Validate with strict coercion
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Show a single job
    #[arg(long)]
    pub job_id: Option<String>,

    /// Directory holding job progress snapshots
    #[arg(long, env = "DOCLOAD_PROGRESS_DIR", default_value = DEFAULT_PROGRESS_DIR)]
    pub progress_dir: PathBuf,
}

/// Truncate `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Multi-line human-readable view of one job.
pub fn render_job(job: &JobState) -> String {
    let status = match job.status {
        JobStatus::Pending => job.status.as_str().yellow(),
        JobStatus::Running => job.status.as_str().cyan(),
        JobStatus::Completed => job.status.as_str().green(),
        JobStatus::Failed => job.status.as_str().red(),
    };

    let mut lines = vec![
        format!("{} [{}]", job.job_id.bold(), status),
        format!("  Table:     {}", job.table_name),
        format!("  File:      {}", job.current_file),
        format!(
            "  Progress:  {}/{} ({:.2}%)",
            job.processed_items, job.total_items, job.progress_percentage
        ),
        format!("  Failed:    {}", job.failed_items),
        format!(
            "  Rate:      {:.2} items/s over {:.2}s",
            job.items_per_second, job.elapsed_time
        ),
        format!("  Started:   {}", job.start_time.to_rfc3339()),
        format!("  Updated:   {}", job.last_update_time.to_rfc3339()),
    ];
    if let Some(eta) = job.estimated_completion {
        lines.push(format!("  ETA:       {}", eta.to_rfc3339()));
    }
    if let Some(message) = &job.error_message {
        lines.push(format!("  Error:     {}", message.red()));
    }
    lines.join("\n")
}
