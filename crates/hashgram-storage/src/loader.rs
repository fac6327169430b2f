//! Bulk loader for `HASH:COUNT` text dumps.
//!
//! Populates the record store that the indexing pipeline reads. Each
//! non-blank line must split on `:` into exactly a hash and an unsigned
//! count; anything else is reported and skipped. The loader is a one-shot
//! import and keeps no progress of its own.

use std::io::BufRead;

use tracing::{debug, info, warn};

use hashgram_types::StoredRecord;

use crate::db::Storage;
use crate::error::StorageError;

/// Default number of records per atomic write.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 100_000;

/// Counters reported by a load run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Lines read, including blank and invalid ones
    pub lines_read: u64,
    /// Records written to the store
    pub records_loaded: u64,
    /// Non-blank lines that did not parse as `HASH:COUNT`
    pub invalid_lines: u64,
    /// Write batches committed
    pub batches_written: u64,
}

/// Streams a dump into [`Storage`] in bounded write batches.
pub struct RecordLoader<'a> {
    storage: &'a Storage,
    batch_size: usize,
}

impl<'a> RecordLoader<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }

    /// Set the number of records per write batch.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Parse one dump line into a record body.
    pub fn parse_line(line: &str) -> Option<StoredRecord> {
        let mut parts = line.split(':');
        let hash = parts.next()?;
        let count = parts.next()?;
        if parts.next().is_some() || hash.is_empty() {
            return None;
        }
        let count: u64 = count.trim().parse().ok()?;
        Some(StoredRecord::new(hash, count))
    }

    /// Load every line of `reader`.
    pub fn load<R: BufRead>(&self, reader: R) -> Result<LoadStats, StorageError> {
        let mut stats = LoadStats::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        for line in reader.lines() {
            let line = line?;
            stats.lines_read += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Self::parse_line(line) {
                Some(record) => batch.push(record),
                None => {
                    stats.invalid_lines += 1;
                    warn!(line_number = stats.lines_read, line = %line, "Skipping invalid line");
                    continue;
                }
            }

            if batch.len() >= self.batch_size {
                self.write_batch(&mut batch, &mut stats)?;
            }
        }

        if !batch.is_empty() {
            self.write_batch(&mut batch, &mut stats)?;
        }

        info!(
            lines = stats.lines_read,
            loaded = stats.records_loaded,
            invalid = stats.invalid_lines,
            "Load complete"
        );
        Ok(stats)
    }

    fn write_batch(
        &self,
        batch: &mut Vec<StoredRecord>,
        stats: &mut LoadStats,
    ) -> Result<(), StorageError> {
        let ids = self.storage.append_records(batch)?;
        stats.records_loaded += ids.len() as u64;
        stats.batches_written += 1;
        debug!(count = ids.len(), total = stats.records_loaded, "Inserted records");
        batch.clear();
        Ok(())
    }
}
