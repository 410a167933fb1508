//! Import orchestration
//!
//! Wires a record source, the transformer, the batch dispatcher and a sink
//! together and drives the job lifecycle:
//!
//! 1. configuration (schema, keys, sink) is resolved; failures mark the job
//!    `failed` before it ever runs
//! 2. the first record is transformed as a preflight check of the schema
//! 3. the job is started and every record is transformed and dispatched;
//!    records that cannot produce a keyed document count as failures
//! 4. the job is completed, or failed if the source or sink aborted

use std::path::Path;

use tracing::{info, warn};

use crate::config::{ImportConfig, SinkConfig};
use crate::dispatch::{BatchDispatcher, BatchObserver, BatchOutcome};
use crate::document::Document;
use crate::error::{IngestError, Result};
use crate::progress::ProgressTracker;
use crate::schema::{KeySpec, SchemaConfig};
use crate::sink::{BatchSink, JsonLinesSink};
use crate::source::{CsvRecordSource, RecordSource};
use crate::transform::Transformer;
use docload_common::job::JobStore;

/// Result of one import run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub job_id: Option<String>,
    pub successful: usize,
    /// Delivery failures plus rejected records
    pub failed: usize,
    /// Records rejected before dispatch
    pub rejected: usize,
    pub batches: usize,
}

impl ImportSummary {
    pub fn all_failed(&self) -> bool {
        self.successful == 0 && self.failed > 0
    }
}

/// One configured import over a source, transformer and sink
pub struct Importer<'a> {
    source: &'a dyn RecordSource,
    transformer: &'a Transformer,
    dispatcher: BatchDispatcher,
    sink: &'a dyn BatchSink,
    tracker: Option<&'a ProgressTracker>,
}

impl<'a> Importer<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        transformer: &'a Transformer,
        dispatcher: BatchDispatcher,
        sink: &'a dyn BatchSink,
    ) -> Self {
        Self {
            source,
            transformer,
            dispatcher,
            sink,
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: &'a ProgressTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Run the import to completion.
    ///
    /// Errors are configuration, source or fatal sink errors; the job has
    /// been marked failed by the time one is returned.
    pub async fn run(&self) -> Result<ImportSummary> {
        if let Err(e) = self.preflight() {
            fail_job(self.tracker, &e);
            return Err(e);
        }

        if let Some(tracker) = self.tracker {
            if let Err(e) = tracker.start() {
                let e = IngestError::from(e);
                fail_job(self.tracker, &e);
                return Err(e);
            }
        }

        let records = match self.source.open() {
            Ok(records) => records,
            Err(e) => {
                fail_job(self.tracker, &e);
                return Err(e);
            },
        };

        let observer = self.tracker;
        let mut rejected = 0usize;
        let documents = records.enumerate().filter_map(|(row, record)| {
            let record = match record {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            match self.transformer.transform(&record) {
                Ok(doc) => Some(Ok(doc)),
                Err(e) => {
                    // rows are 1-based after the header line
                    warn!(row = row + 1, error = %e, "Rejecting record");
                    rejected += 1;
                    observer.on_batch(&BatchOutcome::all_failed(1));
                    None
                },
            }
        });

        let dispatched = self
            .dispatcher
            .dispatch_stream(documents, self.sink, &observer)
            .await;

        match dispatched {
            Ok(summary) => {
                let unresolved = self.transformer.unresolved_columns();
                if !unresolved.is_empty() {
                    warn!(
                        columns = ?unresolved,
                        "Some mapped source columns were missing from the input"
                    );
                }
                if let Some(tracker) = self.tracker {
                    tracker.complete()?;
                }
                let summary = ImportSummary {
                    job_id: self.tracker.map(ProgressTracker::job_id),
                    successful: summary.total_success,
                    failed: summary.total_failure + rejected,
                    rejected,
                    batches: summary.batches,
                };
                info!(
                    successful = summary.successful,
                    failed = summary.failed,
                    rejected = summary.rejected,
                    "Import complete"
                );
                Ok(summary)
            },
            Err(aborted) => {
                let e = IngestError::Dispatch(aborted);
                fail_job(self.tracker, &e);
                Err(e)
            },
        }
    }

    pub fn preflight(&self) -> Result<Option<Document>> {
        preflight(self.source, self.transformer)
    }
}

/// Transform the first record and check it yields a keyed document.
///
/// An empty source passes with a warning.
pub fn preflight(source: &dyn RecordSource, transformer: &Transformer) -> Result<Option<Document>> {
    let mut records = source.open()?;
    let Some(first) = records.next().transpose()? else {
        warn!(source = %source.describe(), "No sample rows available for schema validation");
        return Ok(None);
    };

    info!("Validating schema with sample row");
    transformer.transform(&first).map(Some).map_err(|e| {
        IngestError::config(format!("Schema validation failed with sample row: {e}"))
    })
}

fn fail_job(tracker: Option<&ProgressTracker>, error: &IngestError) {
    if let Some(tracker) = tracker {
        if let Err(e) = tracker.fail(error.to_string()) {
            warn!(error = %e, "Could not mark job as failed");
        }
    }
}

/// Load the schema file, or an empty schema selecting the legacy layout.
pub fn load_schema(schema_file: Option<&Path>) -> Result<SchemaConfig> {
    match schema_file {
        Some(path) => Ok(SchemaConfig::from_path(path)?),
        None => Ok(SchemaConfig::default()),
    }
}

/// Build the transformer for `schema`, checking the key configuration.
pub fn build_transformer(
    schema: SchemaConfig,
    keys: KeySpec,
    config: &ImportConfig,
) -> Result<Transformer> {
    if let Some(mapping) = &schema.mapping {
        if keys.hash_key.is_none() {
            return Err(IngestError::config(
                "Hash key is required: set hashKey in the schema or pass --hash-key",
            ));
        }
        keys.check_against(mapping);
    } else {
        info!("No schema mapping configured, using the legacy default layout");
    }

    if let Some(hash) = &keys.hash_key {
        info!(hash_key = %hash, range_key = ?keys.range_key, "Using document keys");
    }
    Ok(Transformer::new(schema.mapping, keys).with_mode(config.coercion_mode()))
}

#[cfg_attr(not(feature = "dynamodb"), allow(unused_variables))]
async fn build_sink(config: &ImportConfig, keys: &mut KeySpec) -> Result<Box<dyn BatchSink>> {
    match &config.sink {
        SinkConfig::JsonLines { path } => {
            info!(path = %path.display(), "Writing documents to JSON Lines file");
            Ok(Box::new(JsonLinesSink::create(path.clone())?))
        },
        #[cfg(feature = "dynamodb")]
        SinkConfig::DynamoDb {
            region,
            profile,
            endpoint_url,
        } => {
            use crate::sink::dynamodb::{DynamoDbOptions, DynamoDbSink};

            let options = DynamoDbOptions {
                region: region.clone(),
                profile: profile.clone(),
                endpoint_url: endpoint_url.clone(),
            };
            let sink = DynamoDbSink::connect(config.table_name.clone(), &options).await;
            let table_keys = sink.describe_keys().await?;
            if keys.hash_key.is_none() {
                keys.hash_key = table_keys.hash_key;
            }
            if keys.range_key.is_none() {
                keys.range_key = table_keys.range_key;
            }
            Ok(Box::new(sink))
        },
        #[cfg(not(feature = "dynamodb"))]
        SinkConfig::DynamoDb { .. } => {
            Err(IngestError::config(
                "This build has no DynamoDB support; rebuild with --features dynamodb",
            ))
        },
    }
}

/// Run a complete import as described by `config`.
pub async fn import(config: &ImportConfig) -> Result<ImportSummary> {
    config.validate()?;
    info!(
        table = %config.table_name,
        file = %config.input.display(),
        sink = config.sink.kind(),
        "Starting import"
    );

    let source = CsvRecordSource::new(&config.input, &config.encoding)?;
    let tracker = if config.monitor {
        create_tracker(config, &source)
    } else {
        None
    };

    let prepared = async {
        let schema = load_schema(config.schema_file.as_deref())?;
        let mut keys =
            KeySpec::resolve(&schema, config.hash_key.as_deref(), config.range_key.as_deref());
        let sink = build_sink(config, &mut keys).await?;
        let transformer = build_transformer(schema, keys, config)?;
        let dispatcher = BatchDispatcher::new(config.batch_size, config.workers)?;
        Ok::<_, IngestError>((sink, transformer, dispatcher))
    }
    .await;

    let (sink, transformer, dispatcher) = match prepared {
        Ok(parts) => parts,
        Err(e) => {
            fail_job(tracker.as_ref(), &e);
            return Err(e);
        },
    };

    let mut importer = Importer::new(&source, &transformer, dispatcher, sink.as_ref());
    if let Some(tracker) = &tracker {
        importer = importer.with_tracker(tracker);
    }
    importer.run().await
}

/// Progress tracking is optional: a tracker that cannot be created only
/// costs observability.
fn create_tracker(config: &ImportConfig, source: &CsvRecordSource) -> Option<ProgressTracker> {
    let total = source.estimate_total();
    info!(total_items = total, "Counted input rows (excluding header)");

    let created = JobStore::open(&config.progress_dir).and_then(|store| {
        ProgressTracker::create(
            store,
            config.job_id.clone(),
            &config.table_name,
            &config.input,
            total,
        )
    });
    match created {
        Ok(tracker) => {
            info!(job_id = %tracker.job_id(), "Progress monitoring enabled");
            Some(tracker)
        },
        Err(e) => {
            warn!(error = %e, "Failed to initialize progress tracking");
            None
        },
    }
}

/// Check a schema against the first record of `input` without importing.
///
/// Returns the transformed sample document.
pub fn validate_sample(
    input: &Path,
    schema_file: &Path,
    encoding: &str,
    strict: bool,
) -> Result<Document> {
    let source = CsvRecordSource::new(input, encoding)?;
    let schema = SchemaConfig::from_path(schema_file)?;
    let keys = KeySpec::resolve(&schema, None, None);

    let mut config = ImportConfig::new("validation_only", input);
    config.strict = strict;
    let transformer = build_transformer(schema, keys, &config)?;

    preflight(&source, &transformer)?
        .ok_or_else(|| IngestError::config("No data found in input file"))
}
