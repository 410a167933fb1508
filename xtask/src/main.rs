//! Build automation tasks for docload
//!
//! Currently generates the CLI reference from the clap definitions so the
//! docs cannot drift from the binary.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for docload", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<docload_ingest::cli::Cli>();

    let content = format!(
        r#"# docload CLI Reference

Generated from the CLI source code on {}.

## Quick Start

```bash
# Check a schema against the first row of a file
docload validate --file customers.csv --schema schema.json

# Import into a JSON Lines file
docload import --table customers --file customers.csv --schema schema.json

# Import into DynamoDB (build with --features dynamodb)
docload import --table customers --file customers.csv --schema schema.json \
  --sink dynamodb --region eu-west-1

# Watch progress from another terminal
docload status
```

## Commands

{}

## Environment Variables

- `DOCLOAD_BATCH_SIZE` - documents per batch (default: `25`)
- `DOCLOAD_WORKERS` - concurrent batch deliveries (default: `10`)
- `DOCLOAD_PROGRESS_DIR` - job snapshot directory (default: `./progress`)
- `DOCLOAD_ENCODING` - input encoding (default: `utf-8`)
- `DOCLOAD_SINK` - `jsonl` or `dynamodb` (default: `jsonl`)
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILTER` - logging

A `.env` file in the working directory is loaded first.

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
