//! End-to-end test infrastructure for hashgram.
//!
//! Provides a shared TestHarness, corpus generators, a reference model of
//! the expected index, and an index store with injectable failures.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use hashgram_indexing::{
    ngrams, IndexStore, PipelineConfig, PipelineStats, ProgressCallback, RocksIndexStore,
    WriteError, WriterConfig,
};
use hashgram_storage::{LoadStats, RecordLoader, Storage};
use hashgram_types::{Posting, RecordId, StoredRecord};

/// Shared test harness for E2E tests.
///
/// Owns a temp directory holding one RocksDB store.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Shared storage instance
    pub storage: Arc<Storage>,
}

impl TestHarness {
    /// Create a new test harness with temp directory and storage.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            storage,
        }
    }

    /// Close and reopen the store, as a restarted process would.
    ///
    /// Every other clone of `storage` must be dropped first.
    pub fn reopen(self) -> Self {
        let TestHarness { _temp_dir, storage } = self;
        drop(storage);
        let storage =
            Arc::new(Storage::open(_temp_dir.path()).expect("Failed to reopen test storage"));
        Self { _temp_dir, storage }
    }

    /// Store `hashes` as records with ids in insertion order.
    pub fn load_hashes(&self, hashes: &[String]) -> Vec<RecordId> {
        let records: Vec<_> = hashes
            .iter()
            .enumerate()
            .map(|(i, h)| StoredRecord::new(h.as_str(), i as u64 % 97))
            .collect();
        self.storage
            .append_records(&records)
            .expect("Failed to append records")
    }

    /// Load a `HASH:COUNT` dump through the bulk loader.
    pub fn load_dump(&self, dump: &str) -> LoadStats {
        RecordLoader::new(&self.storage)
            .with_batch_size(64)
            .load(Cursor::new(dump))
            .expect("Failed to load dump")
    }

    /// Every posting currently in the index.
    pub fn postings(&self) -> BTreeSet<Posting> {
        self.storage
            .all_postings()
            .expect("Failed to read postings")
            .into_iter()
            .collect()
    }

    /// The postings a correct run with n-gram length `k` must produce.
    pub fn expected_postings(&self, k: usize) -> BTreeSet<Posting> {
        let records = self
            .storage
            .get_records_after(None, None, usize::MAX)
            .expect("Failed to read records");

        records
            .into_iter()
            .filter_map(|record| record.hash.map(|hash| (record.id, hash)))
            .flat_map(|(id, hash)| {
                ngrams(&hash, k)
                    .into_iter()
                    .map(move |ngram| Posting::new(ngram, id))
            })
            .collect()
    }

    /// Index store backed by this harness, failing as `faults` says.
    pub fn flaky_store(&self, faults: Faults) -> Arc<FlakyIndexStore> {
        Arc::new(FlakyIndexStore::new(self.storage.clone(), faults))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` random uppercase hex hashes of `len` characters.
///
/// Seeded so every run of a test sees the same corpus.
pub fn random_hashes(seed: u64, count: usize, len: usize) -> Vec<String> {
    const HEX: &[u8] = b"0123456789ABCDEF";
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (0..len)
                .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
                .collect()
        })
        .collect()
}

/// Pipeline config with small batches and millisecond backoff.
pub fn fast_config(batch_size: usize) -> PipelineConfig {
    PipelineConfig::default()
        .with_batch_size(batch_size)
        .with_writer_config(fast_writer(3))
}

pub fn fast_writer(max_retries: u32) -> WriterConfig {
    WriterConfig {
        max_retries,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
    }
}

/// Failure pattern for [`FlakyIndexStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// The first n calls fail transiently
    pub fail_first: u64,
    /// Every n-th call fails transiently
    pub transient_every: Option<u64>,
    /// Calls after this many successful writes fail fatally
    pub fatal_after: Option<u64>,
    /// Calls after this many successful writes fail transiently, forever
    pub stuck_after: Option<u64>,
    /// Write the first half of a batch before failing transiently
    pub partial_writes: bool,
}

/// RocksDB index store with injected failures.
pub struct FlakyIndexStore {
    inner: RocksIndexStore,
    faults: Faults,
    calls: AtomicU64,
    successes: AtomicU64,
}

impl FlakyIndexStore {
    pub fn new(storage: Arc<Storage>, faults: Faults) -> Self {
        Self {
            inner: RocksIndexStore::new(storage),
            faults,
            calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    async fn fail_transiently(&self, postings: &[Posting]) -> WriteError {
        if self.faults.partial_writes {
            let half = postings.len() / 2;
            let _ = self.inner.bulk_upsert(&postings[..half]).await;
        }
        WriteError::Transient("injected timeout".to_string())
    }
}

#[async_trait]
impl IndexStore for FlakyIndexStore {
    async fn bulk_upsert(&self, postings: &[Posting]) -> Result<usize, WriteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let done = self.successes();

        if self.faults.fatal_after.is_some_and(|limit| done >= limit) {
            return Err(WriteError::Fatal("injected rejection".to_string()));
        }
        if self.faults.stuck_after.is_some_and(|limit| done >= limit) {
            return Err(self.fail_transiently(postings).await);
        }
        if call <= self.faults.fail_first
            || self.faults.transient_every.is_some_and(|n| call % n == 0)
        {
            return Err(self.fail_transiently(postings).await);
        }

        let inserted = self.inner.bulk_upsert(postings).await?;
        self.successes.fetch_add(1, Ordering::SeqCst);
        Ok(inserted)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Cancels a run once it has read `after` records, like an operator stop.
pub struct CancelAfter {
    pub after: u64,
    pub cancel: CancellationToken,
}

impl ProgressCallback for CancelAfter {
    fn on_progress(&self, _partition: &str, stats: &PipelineStats) {
        if stats.records_read >= self.after {
            self.cancel.cancel();
        }
    }
}
