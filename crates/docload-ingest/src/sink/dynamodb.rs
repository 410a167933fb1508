//! DynamoDB sink
//!
//! Writes batches with `BatchWriteItem` in request chunks of 25. Items the
//! service reports as unprocessed are retried a few times with backoff and
//! then counted as failures.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    config::Region,
    error::DisplayErrorContext,
    primitives::Blob,
    types::{AttributeValue as DdbValue, KeyType, PutRequest, WriteRequest},
    Client,
};
use tracing::{debug, info, warn};

use super::{BatchSink, SinkError};
use crate::dispatch::BatchOutcome;
use crate::document::{AttributeValue, Document};
use crate::schema::KeySpec;

/// Service limit on requests per `BatchWriteItem` call
pub const MAX_WRITE_CHUNK: usize = 25;
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Connection settings for [`DynamoDbSink::connect`]
#[derive(Debug, Clone, Default)]
pub struct DynamoDbOptions {
    pub region: Option<String>,
    pub profile: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DynamoDbSink {
    client: Client,
    table: String,
}

impl DynamoDbSink {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Build a client from the default credential chain.
    pub async fn connect(table: impl Into<String>, options: &DynamoDbOptions) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &options.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &options.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        Self::new(Client::new(&sdk_config), table)
    }

    /// Check the table is reachable and read its key schema.
    pub async fn describe_keys(&self) -> Result<KeySpec, SinkError> {
        let output = self
            .client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await
            .map_err(|e| {
                SinkError::Fatal(format!(
                    "Error accessing table {}: {}",
                    self.table,
                    DisplayErrorContext(&e)
                ))
            })?;
        info!(table = %self.table, "Connected to table");

        let mut keys = KeySpec::default();
        if let Some(table) = output.table() {
            for element in table.key_schema() {
                match element.key_type() {
                    KeyType::Hash => keys.hash_key = Some(element.attribute_name().to_string()),
                    KeyType::Range => keys.range_key = Some(element.attribute_name().to_string()),
                    _ => {},
                }
            }
        }
        Ok(keys)
    }

    /// Write one chunk, returning how many of its items were stored.
    async fn write_chunk(&self, chunk: &[Document]) -> Result<usize, SinkError> {
        let mut pending = chunk
            .iter()
            .map(put_request)
            .collect::<Result<Vec<_>, _>>()?;
        let total = pending.len();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
            }

            let output = self
                .client
                .batch_write_item()
                .set_request_items(Some(HashMap::from([(self.table.clone(), pending)])))
                .send()
                .await
                .map_err(|e| {
                    let not_found = e
                        .as_service_error()
                        .is_some_and(|se| se.is_resource_not_found_exception());
                    let msg = format!("BatchWriteItem failed: {}", DisplayErrorContext(&e));
                    if not_found {
                        SinkError::Fatal(msg)
                    } else {
                        SinkError::Unavailable(msg)
                    }
                })?;

            pending = output
                .unprocessed_items()
                .and_then(|items| items.get(&self.table))
                .cloned()
                .unwrap_or_default();
            if pending.is_empty() {
                return Ok(total);
            }
            debug!(
                table = %self.table,
                unprocessed = pending.len(),
                attempt = attempt + 1,
                "Retrying unprocessed items"
            );
        }

        warn!(
            table = %self.table,
            unprocessed = pending.len(),
            "Giving up on unprocessed items"
        );
        Ok(total - pending.len())
    }
}

#[async_trait]
impl BatchSink for DynamoDbSink {
    fn name(&self) -> &str {
        "dynamodb"
    }

    async fn deliver(&self, batch: &[Document]) -> Result<BatchOutcome, SinkError> {
        let mut outcome = BatchOutcome::default();
        let mut unreachable = 0;
        let chunks = batch.chunks(MAX_WRITE_CHUNK);
        let chunk_count = chunks.len();

        for chunk in chunks {
            match self.write_chunk(chunk).await {
                Ok(stored) => {
                    outcome.success_count += stored;
                    outcome.failure_count += chunk.len() - stored;
                },
                Err(SinkError::Unavailable(msg)) => {
                    warn!(table = %self.table, error = %msg, items = chunk.len(), "Chunk not delivered");
                    outcome.failure_count += chunk.len();
                    unreachable += 1;
                },
                Err(fatal) => return Err(fatal),
            }
        }

        if chunk_count > 0 && unreachable == chunk_count {
            return Err(SinkError::Unavailable(format!(
                "No chunk of the batch reached table {}",
                self.table
            )));
        }
        Ok(outcome)
    }
}

fn put_request(doc: &Document) -> Result<WriteRequest, SinkError> {
    let put = PutRequest::builder()
        .set_item(Some(to_item(doc)))
        .build()
        .map_err(|e| SinkError::Fatal(format!("Invalid put request: {e}")))?;
    Ok(WriteRequest::builder().put_request(put).build())
}

pub fn to_item(doc: &Document) -> HashMap<String, DdbValue> {
    doc.iter().map(|(k, v)| (k.clone(), to_ddb(v))).collect()
}

/// Convert a document value to the SDK representation.
pub fn to_ddb(value: &AttributeValue) -> DdbValue {
    match value {
        AttributeValue::S(s) => DdbValue::S(s.clone()),
        AttributeValue::N(n) => DdbValue::N(n.to_string()),
        AttributeValue::B(bytes) => DdbValue::B(Blob::new(bytes.clone())),
        AttributeValue::Bool(b) => DdbValue::Bool(*b),
        AttributeValue::Null(b) => DdbValue::Null(*b),
        AttributeValue::L(items) => DdbValue::L(items.iter().map(to_ddb).collect()),
        AttributeValue::M(fields) => DdbValue::M(to_item(fields)),
        AttributeValue::Ss(set) => DdbValue::Ss(set.iter().cloned().collect()),
        AttributeValue::Ns(set) => DdbValue::Ns(set.iter().map(|n| n.to_string()).collect()),
    }
}
