//! Docload - CSV to document import tool

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use docload_common::job::{JobStateCache, JobStore, DEFAULT_CACHE_TTL};
use docload_common::logging::{init_logging, LogConfig, LogLevel};
use docload_ingest::cli::{self, Cli, Commands, StatusArgs, ValidateArgs};
use docload_ingest::pipeline;
use tracing::{error, info, warn};

/// Longest sample document printed by `validate`
const SAMPLE_PREVIEW_CHARS: usize = 200;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("docload")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {e:#}");
            log_config
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            None
        },
    };

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Import(args) => {
            let config = args.into_config();
            let summary = pipeline::import(&config).await.context("Import failed")?;

            if summary.all_failed() {
                error!(failed = summary.failed, "All items failed to import");
                return Ok(ExitCode::FAILURE);
            }
            if summary.failed > 0 {
                warn!(failed = summary.failed, "Some items failed to import");
            }
            println!(
                "Imported {} items, {} failed{}",
                summary.successful,
                summary.failed,
                summary
                    .job_id
                    .map(|id| format!(" (job {id})"))
                    .unwrap_or_default()
            );
            Ok(ExitCode::SUCCESS)
        },
        Commands::Validate(args) => validate(args),
        Commands::Status(args) => status(args),
    }
}

fn validate(args: ValidateArgs) -> Result<ExitCode> {
    let sample = pipeline::validate_sample(&args.file, &args.schema, &args.encoding, args.strict)
        .context("Schema validation failed")?;
    info!("Schema validation successful");

    let json = serde_json::to_string(&sample).context("Failed to render sample document")?;
    println!("Sample transformed item: {}", cli::truncate(&json, SAMPLE_PREVIEW_CHARS));
    Ok(ExitCode::SUCCESS)
}

fn status(args: StatusArgs) -> Result<ExitCode> {
    let store = JobStore::open(&args.progress_dir).with_context(|| {
        format!("Failed to open progress directory {}", args.progress_dir.display())
    })?;
    let cache = JobStateCache::new(store, DEFAULT_CACHE_TTL);

    let jobs = match &args.job_id {
        Some(job_id) => match cache.get(job_id)? {
            Some(job) => vec![job],
            None => {
                eprintln!("Job not found: {job_id}");
                return Ok(ExitCode::FAILURE);
            },
        },
        None => cache.all()?,
    };

    if jobs.is_empty() {
        println!("No import jobs found in {}", args.progress_dir.display());
        return Ok(ExitCode::SUCCESS);
    }

    for job in &jobs {
        println!("{}", cli::render_job(job));
        println!();
    }
    Ok(ExitCode::SUCCESS)
}
