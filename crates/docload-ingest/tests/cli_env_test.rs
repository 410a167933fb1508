//! Environment variable handling of the command line
//!
//! These tests mutate the process environment, so they run serially.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;

use clap::Parser;
use docload_ingest::cli::{Cli, Commands};
use docload_ingest::config::SinkConfig;
use serial_test::serial;

const VARS: [&str; 4] = [
    "DOCLOAD_BATCH_SIZE",
    "DOCLOAD_WORKERS",
    "DOCLOAD_SINK",
    "DOCLOAD_PROGRESS_DIR",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

fn parse_import(args: &[&str]) -> docload_ingest::config::ImportConfig {
    let argv = ["docload", "import", "--table", "orders", "-f", "orders.csv"]
        .iter()
        .chain(args);
    let cli = Cli::try_parse_from(argv).expect("arguments should parse");
    match cli.command {
        Commands::Import(args) => args.into_config(),
        other => panic!("expected import command, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_environment_supplies_defaults() {
    clear_env();
    std::env::set_var("DOCLOAD_BATCH_SIZE", "7");
    std::env::set_var("DOCLOAD_WORKERS", "3");
    std::env::set_var("DOCLOAD_PROGRESS_DIR", "/tmp/docload-progress");

    let config = parse_import(&[]);
    assert_eq!(config.batch_size, 7);
    assert_eq!(config.workers, 3);
    assert_eq!(config.progress_dir, PathBuf::from("/tmp/docload-progress"));
    clear_env();
}

#[test]
#[serial]
fn test_flags_override_environment() {
    clear_env();
    std::env::set_var("DOCLOAD_BATCH_SIZE", "7");
    std::env::set_var("DOCLOAD_SINK", "dynamodb");

    let config = parse_import(&["--batch-size", "12", "--sink", "jsonl"]);
    assert_eq!(config.batch_size, 12);
    assert_eq!(
        config.sink,
        SinkConfig::JsonLines {
            path: PathBuf::from("orders.jsonl")
        }
    );
    clear_env();
}

#[test]
#[serial]
fn test_built_in_defaults_without_environment() {
    clear_env();

    let config = parse_import(&[]);
    assert_eq!(config.batch_size, 25);
    assert_eq!(config.workers, 10);
    assert_eq!(config.progress_dir, PathBuf::from("./progress"));
    assert_eq!(config.sink.kind(), "jsonl");
}

#[test]
#[serial]
fn test_invalid_environment_value_is_rejected() {
    clear_env();
    std::env::set_var("DOCLOAD_BATCH_SIZE", "many");

    let argv = ["docload", "import", "--table", "orders", "-f", "orders.csv"];
    assert!(Cli::try_parse_from(argv).is_err());
    clear_env();
}
