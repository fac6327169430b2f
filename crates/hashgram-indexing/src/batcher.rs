//! Posting batcher.
//!
//! Accumulates postings from successive records into bounded write batches.
//! Each yielded [`Batch`] records how far the checkpoint may advance once
//! the batch (and every batch before it) is acknowledged.

use std::collections::VecDeque;

use hashgram_types::{Posting, RecordId};

/// A bounded group of postings written in one bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub postings: Vec<Posting>,
    /// Highest record whose postings all sit in this or an earlier batch
    pub through: Option<RecordId>,
    /// Records completed through `through` since the batcher was created
    pub records_through: u64,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

/// Accumulates postings and yields batches of at most `max_size`.
///
/// Every accepted posting ends up in exactly one yielded batch. A record
/// whose postings do not fit in the open batch is split across batches; the
/// checkpoint marker only moves past it once its last posting is sealed.
#[derive(Debug)]
pub struct PostingBatcher {
    max_size: usize,
    open: Vec<Posting>,
    ready: VecDeque<Batch>,
    last_complete: Option<RecordId>,
    completed_records: u64,
}

impl PostingBatcher {
    /// Create a batcher; a `max_size` of zero is treated as one.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            open: Vec::with_capacity(max_size),
            ready: VecDeque::new(),
            last_complete: None,
            completed_records: 0,
        }
    }

    /// Accept all postings derived from one record.
    ///
    /// An empty `postings` still marks the record as complete, so records
    /// that produce nothing do not hold the checkpoint back.
    pub fn accept(&mut self, record_id: RecordId, postings: impl IntoIterator<Item = Posting>) {
        for posting in postings {
            if self.open.len() >= self.max_size {
                self.seal();
            }
            self.open.push(posting);
        }
        self.last_complete = Some(record_id);
        self.completed_records += 1;
    }

    /// Next full batch, if one is ready.
    pub fn flush_ready(&mut self) -> Option<Batch> {
        if self.ready.is_empty() && self.open.len() >= self.max_size {
            self.seal();
        }
        self.ready.pop_front()
    }

    /// Next batch regardless of fill level. Call until it returns `None`.
    pub fn force_flush(&mut self) -> Option<Batch> {
        if self.ready.is_empty() && !self.open.is_empty() {
            self.seal();
        }
        self.ready.pop_front()
    }

    /// Postings accepted but not yet yielded.
    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.open.len() + self.ready.iter().map(Batch::len).sum::<usize>()
    }

    /// Last record whose postings have all been accepted.
    pub fn last_complete(&self) -> Option<RecordId> {
        self.last_complete
    }

    /// Number of records accepted so far.
    pub fn completed_records(&self) -> u64 {
        self.completed_records
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn seal(&mut self) {
        let postings = std::mem::replace(&mut self.open, Vec::with_capacity(self.max_size));
        self.ready.push_back(Batch {
            postings,
            through: self.last_complete,
            records_through: self.completed_records,
        });
    }
}
