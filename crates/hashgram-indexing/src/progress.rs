//! Run counters and progress reporting.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Counters accumulated over one run of one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Records pulled from the source
    pub records_read: u64,
    /// Records skipped for a missing or invalid hash
    pub records_skipped: u64,
    /// Records shorter than the n-gram length (zero postings, not malformed)
    pub short_records: u64,
    /// Postings derived by the tokenizer
    pub postings_generated: u64,
    /// Postings acknowledged by the index store
    pub postings_written: u64,
    /// Batches acknowledged by the index store
    pub batches_written: u64,
    /// Batches that needed more than one attempt
    pub batches_retried: u64,
    /// Bulk-write attempts, successful or not
    pub write_attempts: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add another partition's counters to this one.
    pub fn merge(&mut self, other: &PipelineStats) {
        self.records_read += other.records_read;
        self.records_skipped += other.records_skipped;
        self.short_records += other.short_records;
        self.postings_generated += other.postings_generated;
        self.postings_written += other.postings_written;
        self.batches_written += other.batches_written;
        self.batches_retried += other.batches_retried;
        self.write_attempts += other.write_attempts;
    }
}

/// Receives progress updates from a running pipeline.
pub trait ProgressCallback: Send + Sync {
    /// Called once before streaming with an upper bound on the records to
    /// process, when the source can tell.
    fn on_start(&self, _partition: &str, _total: Option<u64>) {}

    /// Called every `progress_interval` records and once at the end.
    fn on_progress(&self, partition: &str, stats: &PipelineStats);
}

/// Discards all progress.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _partition: &str, _stats: &PipelineStats) {}
}

/// Logs progress at info level.
pub struct LoggingProgressCallback;

impl ProgressCallback for LoggingProgressCallback {
    fn on_start(&self, partition: &str, total: Option<u64>) {
        match total {
            Some(total) => info!(partition, at_most = total, "Records to index"),
            None => info!(partition, "Record count unknown"),
        }
    }

    fn on_progress(&self, partition: &str, stats: &PipelineStats) {
        info!(
            partition,
            records = stats.records_read,
            skipped = stats.records_skipped,
            postings = stats.postings_generated,
            batches = stats.batches_written,
            retried = stats.batches_retried,
            "Indexing progress"
        );
    }
}
