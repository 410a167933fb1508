//! Batch dispatch
//!
//! Documents are grouped into ordered batches of at most `batch_size` and
//! delivered to a [`BatchSink`] with at most `concurrency` deliveries in
//! flight. Outcomes are folded into the running totals in completion order by
//! the single loop that owns them, so no counters are shared between
//! deliveries.
//!
//! Batches are formed lazily from the input iterator as delivery slots free
//! up. With a streaming source, memory stays bounded by `concurrency + 1`
//! batches regardless of input size, at the cost of the input being read no
//! faster than the sink drains.
//!
//! A source error or a fatal sink error stops batch formation. Deliveries
//! already in flight still complete and are reported before the dispatcher
//! returns [`DispatchAborted`].

use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::document::Document;
use crate::error::{IngestError, Result};
use crate::sink::{BatchSink, SinkError};

pub type Batch = Vec<Document>;

/// Per-batch delivery result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchOutcome {
    pub fn new(success_count: usize, failure_count: usize) -> Self {
        Self {
            success_count,
            failure_count,
        }
    }

    pub fn all_failed(size: usize) -> Self {
        Self::new(0, size)
    }

    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }
}

/// Receives every batch outcome exactly once
pub trait BatchObserver: Send + Sync {
    fn on_batch(&self, outcome: &BatchOutcome);
}

impl BatchObserver for () {
    fn on_batch(&self, _outcome: &BatchOutcome) {}
}

impl<O: BatchObserver + ?Sized> BatchObserver for &O {
    fn on_batch(&self, outcome: &BatchOutcome) {
        (**self).on_batch(outcome)
    }
}

impl<O: BatchObserver> BatchObserver for Option<O> {
    fn on_batch(&self, outcome: &BatchOutcome) {
        if let Some(observer) = self {
            observer.on_batch(outcome)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub total_success: usize,
    pub total_failure: usize,
    pub batches: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &BatchOutcome) {
        self.total_success += outcome.success_count;
        self.total_failure += outcome.failure_count;
        self.batches += 1;
    }

    pub fn total(&self) -> usize {
        self.total_success + self.total_failure
    }
}

/// Dispatch stopped early; `summary` covers every batch that was reported.
#[derive(Debug, Error)]
#[error("Dispatch aborted after {} batches: {cause}", .summary.batches)]
pub struct DispatchAborted {
    pub summary: DispatchSummary,
    #[source]
    pub cause: Box<IngestError>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchDispatcher {
    batch_size: usize,
    concurrency: usize,
}

impl BatchDispatcher {
    pub fn new(batch_size: usize, concurrency: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(IngestError::config("batch size must be at least 1"));
        }
        if concurrency == 0 {
            return Err(IngestError::config("concurrency must be at least 1"));
        }
        Ok(Self {
            batch_size,
            concurrency,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Deliver an in-memory list of documents.
    pub async fn dispatch<S, O>(
        &self,
        documents: Vec<Document>,
        sink: &S,
        observer: &O,
    ) -> std::result::Result<DispatchSummary, DispatchAborted>
    where
        S: BatchSink + ?Sized,
        O: BatchObserver + ?Sized,
    {
        self.dispatch_stream(documents.into_iter().map(Ok), sink, observer)
            .await
    }

    /// Deliver documents pulled lazily from `documents`.
    ///
    /// An `Err` item is a source failure: no further batches are formed and
    /// the error becomes the abort cause.
    pub async fn dispatch_stream<I, S, O>(
        &self,
        documents: I,
        sink: &S,
        observer: &O,
    ) -> std::result::Result<DispatchSummary, DispatchAborted>
    where
        I: Iterator<Item = Result<Document>>,
        S: BatchSink + ?Sized,
        O: BatchObserver + ?Sized,
    {
        let stop = AtomicBool::new(false);
        let batches = Batches {
            inner: documents,
            size: self.batch_size,
            next_index: 0,
            done: false,
            stop: &stop,
        };

        let mut deliveries = stream::iter(batches)
            .map(|item| async move {
                let (index, batch) = item?;
                let result = sink.deliver(&batch).await;
                Ok::<_, IngestError>(Delivered {
                    index,
                    size: batch.len(),
                    result,
                })
            })
            .buffer_unordered(self.concurrency);

        let mut summary = DispatchSummary::default();
        let mut cause: Option<IngestError> = None;

        while let Some(delivered) = deliveries.next().await {
            let delivered = match delivered {
                Ok(delivered) => delivered,
                Err(e) => {
                    error!(error = %e, "Record source failed, no further batches will be sent");
                    cause.get_or_insert(e);
                    continue;
                },
            };

            let Delivered {
                index,
                size,
                result,
            } = delivered;
            let outcome = match result {
                Ok(outcome) => normalize(outcome, size, index),
                Err(SinkError::Unavailable(msg)) => {
                    warn!(
                        batch = index,
                        size,
                        error = %msg,
                        sink = sink.name(),
                        "Batch not delivered, counting all items as failed"
                    );
                    BatchOutcome::all_failed(size)
                },
                Err(e @ SinkError::Fatal(_)) => {
                    error!(
                        batch = index,
                        size,
                        error = %e,
                        sink = sink.name(),
                        "Sink failed fatally"
                    );
                    stop.store(true, Ordering::SeqCst);
                    cause.get_or_insert(IngestError::Sink(e));
                    BatchOutcome::all_failed(size)
                },
            };

            debug!(
                batch = index,
                success = outcome.success_count,
                failed = outcome.failure_count,
                "Batch completed"
            );
            summary.record(&outcome);
            observer.on_batch(&outcome);
        }

        match cause {
            Some(cause) => Err(DispatchAborted {
                summary,
                cause: Box::new(cause),
            }),
            None => {
                info!(
                    batches = summary.batches,
                    successful = summary.total_success,
                    failed = summary.total_failure,
                    "Dispatch finished"
                );
                Ok(summary)
            },
        }
    }
}

struct Delivered {
    index: usize,
    size: usize,
    result: std::result::Result<BatchOutcome, SinkError>,
}

/// Make an outcome account for exactly `size` items.
fn normalize(outcome: BatchOutcome, size: usize, index: usize) -> BatchOutcome {
    if outcome.total() == size {
        return outcome;
    }
    warn!(
        batch = index,
        size,
        success = outcome.success_count,
        failed = outcome.failure_count,
        "Sink outcome does not match batch size, adjusting failures"
    );
    let success = outcome.success_count.min(size);
    BatchOutcome::new(success, size - success)
}

/// Groups documents into numbered batches; ends after the first error or
/// once `stop` is raised.
struct Batches<'a, I> {
    inner: I,
    size: usize,
    next_index: usize,
    done: bool,
    stop: &'a AtomicBool,
}

impl<I> Iterator for Batches<'_, I>
where
    I: Iterator<Item = Result<Document>>,
{
    type Item = Result<(usize, Batch)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.stop.load(Ordering::SeqCst) {
            return None;
        }

        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.inner.next() {
                Some(Ok(doc)) => batch.push(doc),
                Some(Err(e)) => {
                    self.done = true;
                    if !batch.is_empty() {
                        warn!(
                            batch = self.next_index,
                            discarded = batch.len(),
                            "Record source failed mid-batch, discarding undelivered documents"
                        );
                    }
                    return Some(Err(e));
                },
                None => {
                    self.done = true;
                    break;
                },
            }
        }

        if batch.is_empty() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(Ok((index, batch)))
    }
}
