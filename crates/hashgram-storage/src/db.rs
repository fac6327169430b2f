//! RocksDB wrapper for hashgram storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Record appends (bulk loader) and cursor-ordered record scans
//! - Atomic posting upserts via WriteBatch
//! - Synced checkpoint writes

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use hashgram_types::{Posting, Record, RecordId, StoredRecord};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_CHECKPOINTS, CF_POSTINGS, CF_RECORDS,
};
use crate::error::StorageError;
use crate::keys::{CheckpointKey, PostingKey, RecordKey};

/// Main storage interface for hashgram
pub struct Storage {
    db: DB,
    /// Next record id handed out by the loader
    next_record_id: AtomicU64,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        // Universal compaction suits the append-only record and posting workload
        db_opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let next_record_id = Self::load_next_record_id(&db)?;

        Ok(Self {
            db,
            next_record_id: AtomicU64::new(next_record_id),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Load the next free record id from the highest existing key
    fn load_next_record_id(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_RECORDS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_RECORDS.to_string()))?;

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            let record_key = RecordKey::from_bytes(&key)?;
            return Ok(record_key.record_id.0 + 1);
        }
        Ok(0)
    }

    // ==================== Record Methods ====================

    /// Append records with freshly assigned, monotonic ids.
    ///
    /// All records of one call land in a single atomic write.
    pub fn append_records(&self, records: &[StoredRecord]) -> Result<Vec<RecordId>, StorageError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let cf = self.cf(CF_RECORDS)?;
        let first = self
            .next_record_id
            .fetch_add(records.len() as u64, Ordering::SeqCst);

        let mut batch = WriteBatch::default();
        let mut ids = Vec::with_capacity(records.len());
        for (offset, record) in records.iter().enumerate() {
            let id = RecordId(first + offset as u64);
            batch.put_cf(cf, RecordKey::new(id).to_bytes(), record.to_bytes()?);
            ids.push(id);
        }

        self.db.write(batch)?;
        debug!(first_id = first, count = records.len(), "Appended records");
        Ok(ids)
    }

    /// Store a raw record body under an explicit id.
    ///
    /// Used for importing rows whose ids were assigned elsewhere; the body is
    /// stored verbatim and decoded leniently on read.
    pub fn put_record_bytes(&self, id: RecordId, body: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        self.db.put_cf(cf, RecordKey::new(id).to_bytes(), body)?;
        self.next_record_id
            .fetch_max(id.0.saturating_add(1), Ordering::SeqCst);
        Ok(())
    }

    /// Get a single record by id
    pub fn get_record(&self, id: RecordId) -> Result<Option<Record>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let result = self.db.get_cf(cf, RecordKey::new(id).to_bytes())?;
        Ok(result.map(|bytes| Record::from_stored(id, &bytes)))
    }

    /// Read up to `limit` records with `after < id < end`, in id order.
    ///
    /// `after = None` starts at the first record; `end = None` is unbounded.
    pub fn get_records_after(
        &self,
        after: Option<RecordId>,
        end: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;

        let start = match after {
            Some(id) => match id.next() {
                Some(next) => next,
                None => return Ok(Vec::new()),
            },
            None => RecordId(0),
        };
        let start_key = RecordKey::new(start).to_bytes();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(RecordKey::prefix()) {
                break;
            }
            let record_key = RecordKey::from_bytes(&key)?;
            if end.is_some_and(|end| record_key.record_id >= end) {
                break;
            }
            results.push(Record::from_stored(record_key.record_id, &value));
        }

        Ok(results)
    }

    /// Lowest and highest record id currently stored.
    pub fn record_id_bounds(&self) -> Result<Option<(RecordId, RecordId)>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;

        let first = match self.db.iterator_cf(cf, IteratorMode::Start).next() {
            Some(item) => RecordKey::from_bytes(&item?.0)?.record_id,
            None => return Ok(None),
        };
        let last = match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => RecordKey::from_bytes(&item?.0)?.record_id,
            None => return Ok(None),
        };

        Ok(Some((first, last)))
    }

    // ==================== Posting Methods ====================

    /// Upsert a set of postings in one atomic write.
    ///
    /// Keys are `(ngram, record_id)` with empty values, so writing a posting
    /// that already exists leaves the index unchanged. Returns the number of
    /// postings written.
    pub fn put_postings(&self, postings: &[Posting]) -> Result<usize, StorageError> {
        if postings.is_empty() {
            return Ok(0);
        }

        let cf = self.cf(CF_POSTINGS)?;
        let mut batch = WriteBatch::default();
        for posting in postings {
            batch.put_cf(
                cf,
                PostingKey::new(posting.ngram.as_str(), posting.record_id).to_bytes(),
                b"",
            );
        }

        self.db.write(batch)?;
        debug!(count = postings.len(), "Wrote postings");
        Ok(postings.len())
    }

    /// Record ids posted under one ngram, in id order.
    pub fn get_postings(&self, ngram: &str) -> Result<Vec<RecordId>, StorageError> {
        let cf = self.cf(CF_POSTINGS)?;
        let prefix = PostingKey::ngram_prefix(ngram);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(PostingKey::from_bytes(&key)?.record_id);
        }

        Ok(ids)
    }

    /// Every posting in the index, in key order.
    ///
    /// Intended for verification and small stores; the scan is unbounded.
    pub fn all_postings(&self) -> Result<Vec<Posting>, StorageError> {
        let cf = self.cf(CF_POSTINGS)?;
        let mut postings = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let key = PostingKey::from_bytes(&key)?;
            postings.push(Posting::new(key.ngram, key.record_id));
        }
        Ok(postings)
    }

    // ==================== Checkpoint Methods ====================

    /// Store a checkpoint with a synced write.
    ///
    /// The WAL is fsync'd before this returns, which also makes every earlier
    /// posting write to this database durable.
    pub fn put_checkpoint(&self, partition: &str, checkpoint_bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);

        let key = CheckpointKey::new(partition);
        self.db
            .put_cf_opt(cf, key.to_bytes(), checkpoint_bytes, &write_opts)?;
        Ok(())
    }

    /// Get the checkpoint for a partition
    pub fn get_checkpoint(&self, partition: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let key = CheckpointKey::new(partition);
        let result = self.db.get_cf(cf, key.to_bytes())?;
        Ok(result)
    }

    /// All saved checkpoints as `(partition, bytes)` pairs.
    pub fn list_checkpoints(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let mut results = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let key = CheckpointKey::from_bytes(&key)?;
            results.push((key.partition, value.to_vec()));
        }
        Ok(results)
    }

    /// Delete one partition's checkpoint. Returns whether it existed.
    pub fn delete_checkpoint(&self, partition: &str) -> Result<bool, StorageError> {
        let existed = self.get_checkpoint(partition)?.is_some();
        if existed {
            let cf = self.cf(CF_CHECKPOINTS)?;
            let mut write_opts = WriteOptions::default();
            write_opts.set_sync(true);
            self.db
                .delete_cf_opt(cf, CheckpointKey::new(partition).to_bytes(), &write_opts)?;
            info!(partition = %partition, "Deleted checkpoint");
        }
        Ok(existed)
    }

    /// Delete every saved checkpoint. Returns how many were removed.
    pub fn clear_checkpoints(&self) -> Result<usize, StorageError> {
        let partitions: Vec<String> = self
            .list_checkpoints()?
            .into_iter()
            .map(|(partition, _)| partition)
            .collect();

        for partition in &partitions {
            self.delete_checkpoint(partition)?;
        }
        Ok(partitions.len())
    }

    // ==================== Admin Operations ====================

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Trigger manual compaction on all column families.
    pub fn compact(&self) -> Result<(), StorageError> {
        info!("Starting full compaction...");
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
            }
        }
        info!("Compaction complete");
        Ok(())
    }

    /// Get database statistics.
    ///
    /// Counts are exact and require a full scan of each column family.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();

        if let Some(cf) = self.db.cf_handle(CF_RECORDS) {
            stats.record_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_POSTINGS) {
            stats.posting_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_CHECKPOINTS) {
            stats.checkpoint_count = self.count_cf_entries(cf)?;
        }

        stats.disk_usage_bytes = self.get_disk_usage();

        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;

        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }

        total_size
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of source records
    pub record_count: u64,
    /// Number of distinct postings in the index
    pub posting_count: u64,
    /// Number of saved partition checkpoints
    pub checkpoint_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn stored(hashes: &[&str]) -> Vec<StoredRecord> {
        hashes.iter().map(|h| StoredRecord::new(*h, 1)).collect()
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_append_assigns_monotonic_ids() {
        let (storage, _temp) = create_test_storage();

        let first = storage.append_records(&stored(&["AAAA", "BBBB"])).unwrap();
        let second = storage.append_records(&stored(&["CCCC"])).unwrap();

        assert_eq!(first, vec![RecordId(0), RecordId(1)]);
        assert_eq!(second, vec![RecordId(2)]);

        let record = storage.get_record(RecordId(2)).unwrap().unwrap();
        assert_eq!(record.hash.as_deref(), Some("CCCC"));
    }

    #[test]
    fn test_next_record_id_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage.append_records(&stored(&["AAAA", "BBBB", "CCCC"])).unwrap();
        }

        let storage = Storage::open(temp_dir.path()).unwrap();
        let ids = storage.append_records(&stored(&["DDDD"])).unwrap();
        assert_eq!(ids, vec![RecordId(3)]);
    }

    #[test]
    fn test_get_records_after_cursor_and_bounds() {
        let (storage, _temp) = create_test_storage();
        storage
            .append_records(&stored(&["A000", "A001", "A002", "A003", "A004"]))
            .unwrap();

        let all = storage.get_records_after(None, None, 100).unwrap();
        assert_eq!(all.len(), 5);

        let after = storage.get_records_after(Some(RecordId(1)), None, 100).unwrap();
        let ids: Vec<_> = after.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RecordId(2), RecordId(3), RecordId(4)]);

        let bounded = storage
            .get_records_after(Some(RecordId(0)), Some(RecordId(3)), 100)
            .unwrap();
        let ids: Vec<_> = bounded.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RecordId(1), RecordId(2)]);

        let limited = storage.get_records_after(None, None, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_put_record_bytes_malformed_body() {
        let (storage, _temp) = create_test_storage();
        storage
            .put_record_bytes(RecordId(10), br#"{"count": 4}"#)
            .unwrap();

        let record = storage.get_record(RecordId(10)).unwrap().unwrap();
        assert!(record.is_malformed());

        // Loader ids continue after explicitly imported ones
        let ids = storage.append_records(&stored(&["EEEE"])).unwrap();
        assert_eq!(ids, vec![RecordId(11)]);
    }

    #[test]
    fn test_record_id_bounds() {
        let (storage, _temp) = create_test_storage();
        assert_eq!(storage.record_id_bounds().unwrap(), None);

        storage.append_records(&stored(&["A", "B", "C"])).unwrap();
        assert_eq!(
            storage.record_id_bounds().unwrap(),
            Some((RecordId(0), RecordId(2)))
        );
    }

    #[test]
    fn test_put_postings_is_upsert() {
        let (storage, _temp) = create_test_storage();
        let postings = vec![
            Posting::new("abcd", RecordId(1)),
            Posting::new("abcd", RecordId(2)),
            Posting::new("bcde", RecordId(1)),
        ];

        assert_eq!(storage.put_postings(&postings).unwrap(), 3);
        assert_eq!(storage.put_postings(&postings).unwrap(), 3);

        assert_eq!(
            storage.get_postings("abcd").unwrap(),
            vec![RecordId(1), RecordId(2)]
        );
        assert_eq!(storage.get_postings("bcde").unwrap(), vec![RecordId(1)]);
        assert!(storage.get_postings("zzzz").unwrap().is_empty());
        assert_eq!(storage.all_postings().unwrap().len(), 3);
    }

    #[test]
    fn test_checkpoint_put_get_list_delete() {
        let (storage, _temp) = create_test_storage();

        assert!(storage.get_checkpoint("ngrams").unwrap().is_none());

        storage.put_checkpoint("ngrams", b"{\"a\":1}").unwrap();
        storage.put_checkpoint("ngrams-p0of2", b"{}").unwrap();

        assert_eq!(
            storage.get_checkpoint("ngrams").unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );
        assert_eq!(storage.list_checkpoints().unwrap().len(), 2);

        assert!(storage.delete_checkpoint("ngrams").unwrap());
        assert!(!storage.delete_checkpoint("ngrams").unwrap());
        assert_eq!(storage.clear_checkpoints().unwrap(), 1);
        assert!(storage.list_checkpoints().unwrap().is_empty());
    }

    #[test]
    fn test_get_stats() {
        let (storage, _temp) = create_test_storage();
        storage.append_records(&stored(&["ABCDE"])).unwrap();
        storage
            .put_postings(&[Posting::new("ABCD", RecordId(0)), Posting::new("BCDE", RecordId(0))])
            .unwrap();
        storage.put_checkpoint("ngrams", b"{}").unwrap();

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.posting_count, 2);
        assert_eq!(stats.checkpoint_count, 1);
    }
}
