//! Record sources feeding the pipeline.
//!
//! A source yields records in ascending id order, strictly after the cursor
//! it is given. Reads against [`Storage`] happen in pages on the blocking
//! pool so the async pipeline never stalls on RocksDB.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use hashgram_storage::Storage;
use hashgram_types::{Record, RecordId};

use crate::error::IndexingError;

/// Ordered stream of records that can be restarted from a cursor.
#[async_trait]
pub trait RecordSource: Send {
    /// Next record with id greater than `after`, or `None` when exhausted.
    ///
    /// `after` is the id of the last record the caller consumed; a source
    /// is free to ignore it when it already tracks its own position.
    async fn next(&mut self, after: Option<RecordId>) -> Result<Option<Record>, IndexingError>;

    /// Upper bound on the records remaining after `after`, when cheaply known.
    fn size_hint(&self, _after: Option<RecordId>) -> Option<u64> {
        None
    }
}

/// Half-open id range `[start, end)`; either side may be unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordRange {
    pub start: Option<RecordId>,
    pub end: Option<RecordId>,
}

impl RecordRange {
    /// The whole record store.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(start: Option<RecordId>, end: Option<RecordId>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.start.map_or(true, |start| id >= start) && self.end.map_or(true, |end| id < end)
    }

    /// Exclusive lower cursor combining the range start with a resume point.
    fn floor(&self, after: Option<RecordId>) -> Option<RecordId> {
        let before_start = self.start.and_then(|start| start.0.checked_sub(1)).map(RecordId);
        match (before_start, after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Pages records out of the RocksDB record store.
pub struct StorageRecordSource {
    storage: Arc<Storage>,
    range: RecordRange,
    page_size: usize,
    buffer: VecDeque<Record>,
    cursor: Option<RecordId>,
    exhausted: bool,
}

impl StorageRecordSource {
    pub fn new(storage: Arc<Storage>, range: RecordRange, page_size: usize) -> Self {
        Self {
            storage,
            range,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    async fn fill(&mut self, after: Option<RecordId>) -> Result<(), IndexingError> {
        let storage = self.storage.clone();
        let end = self.range.end;
        let limit = self.page_size;

        let page = tokio::task::spawn_blocking(move || storage.get_records_after(after, end, limit))
            .await?
            .map_err(|e| IndexingError::Source(e.to_string()))?;

        debug!(after = ?after, count = page.len(), "Fetched record page");
        if page.len() < limit {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

#[async_trait]
impl RecordSource for StorageRecordSource {
    async fn next(&mut self, after: Option<RecordId>) -> Result<Option<Record>, IndexingError> {
        // A cursor behind or ahead of the buffered page invalidates it
        let position = self.range.floor(after.max(self.cursor));
        if after.is_some() && after != self.cursor {
            self.buffer.clear();
            self.exhausted = false;
        }
        while self
            .buffer
            .front()
            .is_some_and(|record| Some(record.id) <= position)
        {
            self.buffer.pop_front();
        }

        if self.buffer.is_empty() {
            if self.exhausted {
                return Ok(None);
            }
            self.fill(position).await?;
        }

        let record = self.buffer.pop_front();
        if let Some(record) = &record {
            self.cursor = Some(record.id);
        }
        Ok(record)
    }

    /// Width of the id span left in the range. Ids need not be dense, so
    /// this can exceed the number of records actually stored.
    fn size_hint(&self, after: Option<RecordId>) -> Option<u64> {
        let (first, last) = self.storage.record_id_bounds().ok()??;
        let low = match self.range.floor(after) {
            Some(floor) => floor.0.checked_add(1)?.max(first.0),
            None => first.0,
        };
        let high = match self.range.end {
            Some(end) => end.0.checked_sub(1)?.min(last.0),
            None => last.0,
        };
        Some(if high >= low { high - low + 1 } else { 0 })
    }
}

/// In-memory source, mostly for tests and small fixed inputs.
#[derive(Debug, Default)]
pub struct VecRecordSource {
    records: VecDeque<Record>,
}

impl VecRecordSource {
    /// Records are sorted by id; duplicates keep their first occurrence.
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_by_key(|r| r.id);
        records.dedup_by_key(|r| r.id);
        Self {
            records: records.into(),
        }
    }
}

#[async_trait]
impl RecordSource for VecRecordSource {
    async fn next(&mut self, after: Option<RecordId>) -> Result<Option<Record>, IndexingError> {
        while self
            .records
            .front()
            .is_some_and(|record| after.is_some_and(|after| record.id <= after))
        {
            self.records.pop_front();
        }
        Ok(self.records.pop_front())
    }

    fn size_hint(&self, after: Option<RecordId>) -> Option<u64> {
        let remaining = self
            .records
            .iter()
            .filter(|r| after.map_or(true, |after| r.id > after))
            .count();
        Some(remaining as u64)
    }
}
