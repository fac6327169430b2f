//! Bulk index writer with retry.
//!
//! Wraps an [`IndexStore`] and retries whole batches on transient failures
//! with exponential backoff. Postings are keyed by `(ngram, record_id)`,
//! so a retried batch that partly landed before the failure is harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use hashgram_storage::Storage;
use hashgram_types::{IndexingSettings, Posting};

use crate::batcher::Batch;
use crate::error::{IndexingError, WriteError};

/// Destination of posting batches.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Upsert every posting of the batch in one operation.
    ///
    /// Returns the number of postings accepted.
    async fn bulk_upsert(&self, postings: &[Posting]) -> Result<usize, WriteError>;

    /// Store name for logs.
    fn name(&self) -> &str;
}

/// Postings column family of the local RocksDB store.
pub struct RocksIndexStore {
    storage: Arc<Storage>,
}

impl RocksIndexStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl IndexStore for RocksIndexStore {
    async fn bulk_upsert(&self, postings: &[Posting]) -> Result<usize, WriteError> {
        let storage = self.storage.clone();
        let postings = postings.to_vec();
        tokio::task::spawn_blocking(move || storage.put_postings(&postings))
            .await
            .map_err(|e| WriteError::Fatal(format!("write task failed: {}", e)))?
            .map_err(WriteError::from)
    }

    fn name(&self) -> &str {
        "rocksdb"
    }
}

/// Retry policy for [`IndexWriter`].
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Upper bound on any single delay
    pub backoff_max: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl WriterConfig {
    pub fn from_settings(settings: &IndexingSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff_base: settings.backoff_base(),
            backoff_max: settings.backoff_max(),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.backoff_base,
            initial_interval: self.backoff_base,
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_interval: self.backoff_max,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Outcome of a successful batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Postings the store accepted
    pub inserted: usize,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

impl WriteResult {
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

/// Writes batches, retrying transient failures.
pub struct IndexWriter {
    store: Arc<dyn IndexStore>,
    config: WriterConfig,
    attempts: AtomicU64,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn IndexStore>, config: WriterConfig) -> Self {
        Self {
            store,
            config,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Store calls made by this writer, whatever their outcome.
    pub fn total_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Write one batch.
    ///
    /// Fatal errors return at once. Transient errors are retried up to
    /// `max_retries` times; when they run out the batch is handed back in
    /// [`IndexingError::FatalWrite`]. Cancellation interrupts the backoff
    /// sleep, never an attempt in flight.
    pub async fn write(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Result<WriteResult, IndexingError> {
        let mut backoff = self.config.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(
                store = self.store.name(),
                postings = batch.len(),
                attempt = attempts,
                "Writing batch"
            );

            let err = match self.store.bulk_upsert(&batch.postings).await {
                Ok(inserted) => return Ok(WriteResult { inserted, attempts }),
                Err(e) => e,
            };

            if !err.is_transient() {
                error!(error = %err, attempts, "Batch write failed");
                return Err(self.give_up(batch, attempts, err));
            }
            if attempts > self.config.max_retries {
                error!(error = %err, attempts, "Max retries exceeded");
                return Err(self.give_up(batch, attempts, err));
            }

            let delay = match backoff.next_backoff() {
                Some(delay) => delay,
                None => return Err(self.give_up(batch, attempts, err)),
            };
            warn!(
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Batch write failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(IndexingError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn give_up(&self, batch: &Batch, attempts: u32, source: WriteError) -> IndexingError {
        IndexingError::FatalWrite {
            batch: Box::new(batch.clone()),
            attempts,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashgram_types::RecordId;
    use std::sync::Mutex;

    /// Store that replays a script of outcomes, then succeeds.
    struct ScriptedStore {
        script: Mutex<Vec<WriteError>>,
        calls: Mutex<u32>,
    }

    impl ScriptedStore {
        fn new(mut failures: Vec<WriteError>) -> Self {
            failures.reverse();
            Self {
                script: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl IndexStore for ScriptedStore {
        async fn bulk_upsert(&self, postings: &[Posting]) -> Result<usize, WriteError> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop() {
                Some(err) => Err(err),
                None => Ok(postings.len()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn fast_config(max_retries: u32) -> WriterConfig {
        WriterConfig {
            max_retries,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        }
    }

    fn sample_batch() -> Batch {
        Batch {
            postings: vec![
                Posting::new("abcd", RecordId(1)),
                Posting::new("bcde", RecordId(1)),
            ],
            through: Some(RecordId(1)),
            records_through: 1,
        }
    }

    fn transient() -> WriteError {
        WriteError::Transient("timed out".to_string())
    }

    #[tokio::test]
    async fn test_write_first_try() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let writer = IndexWriter::new(store.clone(), fast_config(3));

        let result = writer
            .write(&sample_batch(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.inserted, 2);
        assert_eq!(result.attempts, 1);
        assert!(!result.retried());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let store = Arc::new(ScriptedStore::new(vec![transient(), transient()]));
        let writer = IndexWriter::new(store.clone(), fast_config(3));

        let result = writer
            .write(&sample_batch(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.attempts, 3);
        assert!(result.retried());
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_batch() {
        let store = Arc::new(ScriptedStore::new(vec![transient(); 10]));
        let writer = IndexWriter::new(store.clone(), fast_config(2));
        let batch = sample_batch();

        let err = writer
            .write(&batch, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retry_exhaustion());
        assert_eq!(err.failed_batch(), Some(&batch));
        match err {
            IndexingError::FatalWrite { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let store = Arc::new(ScriptedStore::new(vec![WriteError::Fatal(
            "schema rejected".to_string(),
        )]));
        let writer = IndexWriter::new(store.clone(), fast_config(5));

        let err = writer
            .write(&sample_batch(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_retry_exhaustion());
        assert!(err.failed_batch().is_some());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_fails_on_first_transient() {
        let store = Arc::new(ScriptedStore::new(vec![transient()]));
        let writer = IndexWriter::new(store.clone(), fast_config(0));

        let err = writer
            .write(&sample_batch(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retry_exhaustion());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let store = Arc::new(ScriptedStore::new(vec![transient(); 10]));
        let config = WriterConfig {
            max_retries: 10,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(60),
        };
        let writer = IndexWriter::new(store.clone(), config);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = writer.write(&sample_batch(), &cancel).await.unwrap_err();
        assert!(matches!(err, IndexingError::Cancelled));
        assert_eq!(store.calls(), 1);
        assert_eq!(writer.total_attempts(), 1);
    }

    #[tokio::test]
    async fn test_total_attempts_span_batches_and_failures() {
        let store = Arc::new(ScriptedStore::new(vec![
            transient(),
            WriteError::Fatal("schema rejected".to_string()),
        ]));
        let writer = IndexWriter::new(store.clone(), fast_config(3));
        let cancel = CancellationToken::new();

        assert!(writer.write(&sample_batch(), &cancel).await.is_err());
        writer.write(&sample_batch(), &cancel).await.unwrap();

        assert_eq!(store.calls(), 3);
        assert_eq!(writer.total_attempts(), 3);
    }

    #[tokio::test]
    async fn test_rocks_store_upserts() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let writer = IndexWriter::new(
            Arc::new(RocksIndexStore::new(storage.clone())),
            WriterConfig::default(),
        );
        let cancel = CancellationToken::new();

        writer.write(&sample_batch(), &cancel).await.unwrap();
        writer.write(&sample_batch(), &cancel).await.unwrap();

        assert_eq!(writer.store_name(), "rocksdb");
        assert_eq!(storage.get_postings("abcd").unwrap(), vec![RecordId(1)]);
        assert_eq!(storage.all_postings().unwrap().len(), 2);
    }
}
