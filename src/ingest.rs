//! Adaptive batch ingestion
//!
//! Records are partitioned into fixed-size batches and pushed to the ingestion
//! endpoint. A batch that keeps failing after its retries is split in half and
//! each half is retried on its own, down to `min_batch_size`. A batch at the
//! floor that still fails is fatal for the run.
//!
//! Splitting is driven by an explicit worklist rather than recursion; the
//! stack never holds more than one pending right half per split level.

use crate::error::{Result, SyncError};
use crate::models::{IngestOutcome, Record};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 250;
pub const MAX_RETRIES: usize = 2;
pub const RETRY_SLEEP: Duration = Duration::from_secs(2);
pub const MIN_BATCH_SIZE: usize = 50;

/// Destination accepting batches of records.
pub trait BatchSink {
    /// Submit one batch. Errors are classified per [`SyncError::is_retryable`].
    fn submit(&self, batch: &[Record]) -> Result<IngestOutcome>;
}

impl<T: BatchSink + ?Sized> BatchSink for &T {
    fn submit(&self, batch: &[Record]) -> Result<IngestOutcome> {
        (**self).submit(batch)
    }
}

/// Batch sizing and retry policy
#[derive(Debug, Clone)]
pub struct IngestPolicy {
    pub batch_size: usize,
    /// Attempts per batch before it is split (or fails, at the floor)
    pub max_retries: usize,
    /// Fixed pause between attempts, no backoff
    pub retry_sleep: Duration,
    pub min_batch_size: usize,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: MAX_RETRIES,
            retry_sleep: RETRY_SLEEP,
            min_batch_size: MIN_BATCH_SIZE,
        }
    }
}

impl IngestPolicy {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Partition `records` into contiguous batches of at most `batch_size`.
pub fn partition(records: &[Record], batch_size: usize) -> std::slice::Chunks<'_, Record> {
    records.chunks(batch_size.max(1))
}

/// Ingest all records, returning the aggregate outcome.
///
/// Either every record was covered by a successful submission, or an error is
/// returned. Batches accepted before the error are not rolled back.
pub fn ingest<S: BatchSink>(
    sink: &S,
    records: &[Record],
    policy: &IngestPolicy,
) -> Result<IngestOutcome> {
    for record in records {
        record.validate()?;
    }

    let batch_count = records.len().div_ceil(policy.batch_size.max(1));
    let mut total = IngestOutcome::default();

    for (idx, batch) in partition(records, policy.batch_size).enumerate() {
        info!(
            "Posting batch {}/{} (size={})",
            idx + 1,
            batch_count,
            batch.len()
        );
        let outcome = submit_adaptive(sink, batch, policy)?;
        info!(
            "  -> success={} new={} updated={}",
            outcome.accepted, outcome.new_count, outcome.updated_count
        );
        total.absorb(outcome);
    }

    Ok(total)
}

/// Submit one batch, splitting it on exhausted retries.
pub fn submit_adaptive<S: BatchSink>(
    sink: &S,
    batch: &[Record],
    policy: &IngestPolicy,
) -> Result<IngestOutcome> {
    let floor = policy.min_batch_size.max(1);
    let mut combined = IngestOutcome::default();
    let mut pending: Vec<&[Record]> = vec![batch];

    while let Some(slice) = pending.pop() {
        match submit_with_retry(sink, slice, policy) {
            Ok(outcome) => combined = IngestOutcome::combine(combined, outcome),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if slice.len() <= floor => {
                warn!("Batch of {} failed at minimum size: {}", slice.len(), e);
                return Err(SyncError::BatchFailed {
                    size: slice.len(),
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let (left, right) = slice.split_at(slice.len() / 2);
                warn!(
                    "Timeout/error encountered ({}). Splitting batch {} -> {} + {}",
                    e,
                    slice.len(),
                    left.len(),
                    right.len()
                );
                // LIFO: left is processed (and fully resolved) before right
                pending.push(right);
                pending.push(left);
            }
        }
    }

    Ok(combined)
}

/// Submit one batch with up to `max_retries` attempts.
///
/// Auth and other non-retryable errors return immediately; the last
/// retryable error is returned once attempts run out.
pub fn submit_with_retry<S: BatchSink>(
    sink: &S,
    batch: &[Record],
    policy: &IngestPolicy,
) -> Result<IngestOutcome> {
    let attempts = policy.max_retries.max(1);
    let mut attempt = 1;
    loop {
        match sink.submit(batch) {
            Ok(outcome) => return Ok(outcome),
            Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(
                    "Attempt {}/{} for batch of {} failed: {}",
                    attempt,
                    attempts,
                    batch.len(),
                    e
                );
                if !policy.retry_sleep.is_zero() {
                    std::thread::sleep(policy.retry_sleep);
                }
                attempt += 1;
            }
        }
    }
}
