//! Indexing pipeline for one partition of the record store.
//!
//! Drives read -> tokenize -> batch -> write and owns the partition's
//! checkpoint. The checkpoint is saved only after the batch that completes
//! a record has been acknowledged, so an aborted or killed run restarts
//! without losing postings.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use hashgram_types::{IndexingSettings, MalformedPolicy, Posting, Record, RecordId};

use crate::batcher::{Batch, PostingBatcher};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::IndexingError;
use crate::progress::{NoOpProgressCallback, PipelineStats, ProgressCallback};
use crate::source::RecordSource;
use crate::tokenizer::{tokenize, Tokens};
use crate::writer::{IndexStore, IndexWriter, WriterConfig};

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Resuming,
    Streaming,
    Flushing,
    Completed,
    Aborted,
}

impl PipelineState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Resuming)
            | (Resuming, Streaming)
            | (Streaming, Flushing)
            | (Flushing, Streaming)
            | (Flushing, Completed) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Aborted)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Resuming => "resuming",
            PipelineState::Streaming => "streaming",
            PipelineState::Flushing => "flushing",
            PipelineState::Completed => "completed",
            PipelineState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Configuration for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// N-gram length `k`
    pub ngram_length: usize,
    /// Maximum postings per write batch
    pub batch_size: usize,
    /// Records between progress reports
    pub progress_interval: u64,
    /// What to do with records lacking a usable hash
    pub malformed_policy: MalformedPolicy,
    /// Retry policy of the index writer
    pub writer: WriterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ngram_length: 4,
            batch_size: 10_000,
            progress_interval: 100_000,
            malformed_policy: MalformedPolicy::Skip,
            writer: WriterConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &IndexingSettings) -> Self {
        Self {
            ngram_length: settings.ngram_length,
            batch_size: settings.batch_size,
            progress_interval: settings.progress_interval,
            malformed_policy: settings.malformed_policy,
            writer: WriterConfig::from_settings(settings),
        }
    }

    pub fn with_ngram_length(mut self, k: usize) -> Self {
        self.ngram_length = k;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }

    pub fn with_writer_config(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }
}

/// Outcome of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub partition: String,
    /// `Completed` or `Aborted`
    pub state: PipelineState,
    pub stats: PipelineStats,
    /// Last checkpoint durably saved, loaded or written by this run
    pub checkpoint: Option<Checkpoint>,
    /// Why the run aborted
    pub error: Option<IndexingError>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// Record id a restart would resume after.
    pub fn resume_after(&self) -> Option<RecordId> {
        self.checkpoint.as_ref().and_then(|c| c.last_record_id)
    }
}

/// Single-partition orchestrator.
///
/// Writes are awaited in line, so the partition never has two batches in
/// flight and its checkpoint advances in write order.
pub struct IndexingPipeline {
    partition: String,
    config: PipelineConfig,
    source: Box<dyn RecordSource>,
    writer: IndexWriter,
    checkpoints: Arc<dyn CheckpointStore>,
    progress: Arc<dyn ProgressCallback>,
    state: PipelineState,
    stats: PipelineStats,
    checkpoint: Option<Checkpoint>,
}

impl IndexingPipeline {
    /// Create a new indexing pipeline.
    pub fn new(
        partition: impl Into<String>,
        config: PipelineConfig,
        source: Box<dyn RecordSource>,
        store: Arc<dyn IndexStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let writer = IndexWriter::new(store, config.writer.clone());
        Self {
            partition: partition.into(),
            config,
            source,
            writer,
            checkpoints,
            progress: Arc::new(NoOpProgressCallback),
            state: PipelineState::Idle,
            stats: PipelineStats::default(),
            checkpoint: None,
        }
    }

    /// Report progress to `progress` instead of discarding it.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run to completion, abort, or cancellation.
    ///
    /// Never returns early with an error: failures end in an `Aborted`
    /// report carrying the error and the last saved checkpoint.
    pub async fn run(mut self, cancel: CancellationToken) -> PipelineReport {
        let start = Instant::now();

        let outcome = match self.execute(&cancel).await {
            Ok(()) => self.transition(PipelineState::Completed),
            Err(e) => Err(e),
        };
        let error = outcome.err();
        if error.is_some() {
            self.state = PipelineState::Aborted;
        }

        self.progress.on_progress(&self.partition, &self.stats);
        let resume_after = self.checkpoint.as_ref().and_then(|c| c.last_record_id);
        match &error {
            None => info!(
                partition = %self.partition,
                records = self.stats.records_read,
                skipped = self.stats.records_skipped,
                postings = self.stats.postings_generated,
                batches = self.stats.batches_written,
                retried = self.stats.batches_retried,
                "Indexing completed"
            ),
            Some(e) => error!(
                partition = %self.partition,
                error = %e,
                last_checkpoint = ?resume_after,
                "Indexing aborted"
            ),
        }

        PipelineReport {
            partition: self.partition,
            state: self.state,
            stats: self.stats,
            checkpoint: self.checkpoint,
            error,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<(), IndexingError> {
        self.transition(PipelineState::Resuming)?;
        let store = self.checkpoints.clone();
        let partition = self.partition.clone();
        self.checkpoint = tokio::task::spawn_blocking(move || store.load(&partition)).await??;

        let resume_after = self.checkpoint.as_ref().and_then(|c| c.last_record_id);
        let base = self.checkpoint.as_ref().map_or(0, |c| c.records_indexed);
        info!(partition = %self.partition, resume_after = ?resume_after, "Resuming");

        self.progress
            .on_start(&self.partition, self.source.size_hint(resume_after));
        self.transition(PipelineState::Streaming)?;

        let mut batcher = PostingBatcher::new(self.config.batch_size);
        let mut cursor = resume_after;
        let interval = self.config.progress_interval.max(1);

        loop {
            if cancel.is_cancelled() {
                return Err(IndexingError::Cancelled);
            }

            let record = match self.source.next(cursor).await? {
                Some(record) => record,
                None => break,
            };
            if cursor.is_some_and(|c| record.id <= c) {
                return Err(IndexingError::Source(format!(
                    "record {} is not after cursor {:?}",
                    record.id, cursor
                )));
            }
            cursor = Some(record.id);
            self.stats.records_read += 1;

            let postings = self.derive_postings(&record)?;
            batcher.accept(record.id, postings);

            while let Some(batch) = batcher.flush_ready() {
                self.transition(PipelineState::Flushing)?;
                self.write_batch(batch, base, cancel).await?;
                self.transition(PipelineState::Streaming)?;
            }

            if self.stats.records_read % interval == 0 {
                self.progress.on_progress(&self.partition, &self.stats);
            }
        }

        self.transition(PipelineState::Flushing)?;
        while let Some(batch) = batcher.force_flush() {
            self.write_batch(batch, base, cancel).await?;
        }

        // Trailing records that produced no postings
        if let Some(last) = batcher.last_complete() {
            self.advance_checkpoint(last, base + batcher.completed_records())
                .await?;
        }
        Ok(())
    }

    fn derive_postings(&mut self, record: &Record) -> Result<Vec<Posting>, IndexingError> {
        match tokenize(record.hash.as_deref(), self.config.ngram_length) {
            Tokens::Malformed => match self.config.malformed_policy {
                MalformedPolicy::Skip => {
                    self.stats.records_skipped += 1;
                    debug!(record_id = %record.id, "Skipping malformed record");
                    Ok(Vec::new())
                }
                MalformedPolicy::Abort => Err(IndexingError::MalformedRecord {
                    record_id: record.id,
                }),
            },
            tokens => {
                if tokens.is_empty() {
                    self.stats.short_records += 1;
                    trace!(record_id = %record.id, "Record shorter than n-gram length");
                }
                self.stats.postings_generated += tokens.len() as u64;
                Ok(tokens.into_postings(record.id))
            }
        }
    }

    async fn write_batch(
        &mut self,
        batch: Batch,
        base: u64,
        cancel: &CancellationToken,
    ) -> Result<(), IndexingError> {
        let outcome = self.writer.write(&batch, cancel).await;
        self.stats.write_attempts = self.writer.total_attempts();
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                if matches!(&e, IndexingError::FatalWrite { attempts, .. } if *attempts > 1) {
                    self.stats.batches_retried += 1;
                }
                return Err(e);
            }
        };

        self.stats.postings_written += result.inserted as u64;
        self.stats.batches_written += 1;
        if result.retried() {
            self.stats.batches_retried += 1;
        }
        debug!(
            partition = %self.partition,
            postings = result.inserted,
            attempts = result.attempts,
            through = ?batch.through,
            "Batch written"
        );

        if let Some(through) = batch.through {
            self.advance_checkpoint(through, base + batch.records_through)
                .await?;
        }
        Ok(())
    }

    async fn advance_checkpoint(
        &mut self,
        through: RecordId,
        records_indexed: u64,
    ) -> Result<(), IndexingError> {
        let mut next = self
            .checkpoint
            .clone()
            .unwrap_or_else(|| Checkpoint::new(self.partition.clone()));
        if !next.advance(through, records_indexed) {
            return Ok(());
        }

        let store = self.checkpoints.clone();
        let to_save = next.clone();
        tokio::task::spawn_blocking(move || store.save(&to_save)).await??;
        self.checkpoint = Some(next);
        Ok(())
    }

    fn transition(&mut self, to: PipelineState) -> Result<(), IndexingError> {
        if !self.state.can_transition_to(to) {
            return Err(IndexingError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        trace!(partition = %self.partition, from = %self.state, to = %to, "State transition");
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StorageCheckpointStore;
    use crate::error::WriteError;
    use crate::source::VecRecordSource;
    use async_trait::async_trait;
    use hashgram_storage::Storage;
    use std::collections::{BTreeSet, HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory index; each queued outcome is consumed by one call.
    #[derive(Default)]
    struct MockIndexStore {
        postings: Mutex<BTreeSet<Posting>>,
        script: Mutex<VecDeque<Option<WriteError>>>,
        calls: AtomicUsize,
    }

    impl MockIndexStore {
        fn scripted(script: Vec<Option<WriteError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn snapshot(&self) -> BTreeSet<Posting> {
            self.postings.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IndexStore for MockIndexStore {
        async fn bulk_upsert(&self, postings: &[Posting]) -> Result<usize, WriteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(Some(err)) = self.script.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.postings.lock().unwrap().extend(postings.iter().cloned());
            Ok(postings.len())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[derive(Default)]
    struct MemoryCheckpointStore {
        saved: Mutex<HashMap<String, Checkpoint>>,
        fail_saves: bool,
    }

    impl CheckpointStore for MemoryCheckpointStore {
        fn load(&self, partition: &str) -> Result<Option<Checkpoint>, IndexingError> {
            Ok(self.saved.lock().unwrap().get(partition).cloned())
        }

        fn save(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError> {
            if self.fail_saves {
                return Err(IndexingError::Checkpoint("disk full".to_string()));
            }
            self.saved
                .lock()
                .unwrap()
                .insert(checkpoint.partition.clone(), checkpoint.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProgress {
        starts: Mutex<Vec<Option<u64>>>,
        updates: AtomicUsize,
    }

    impl ProgressCallback for CountingProgress {
        fn on_start(&self, _partition: &str, total: Option<u64>) {
            self.starts.lock().unwrap().push(total);
        }

        fn on_progress(&self, _partition: &str, _stats: &PipelineStats) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_records() -> Vec<Record> {
        vec![
            Record::new(RecordId(0), "abcdef", 1),
            Record::new(RecordId(1), "ab", 3),
            Record::malformed(RecordId(2)),
            Record::new(RecordId(3), "bcdefg", 2),
        ]
    }

    fn fast_config(batch_size: usize) -> PipelineConfig {
        PipelineConfig::default()
            .with_batch_size(batch_size)
            .with_writer_config(WriterConfig {
                max_retries: 3,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(2),
            })
    }

    fn pipeline(
        records: Vec<Record>,
        config: PipelineConfig,
        store: Arc<MockIndexStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> IndexingPipeline {
        IndexingPipeline::new(
            "ngrams",
            config,
            Box::new(VecRecordSource::new(records)),
            store,
            checkpoints,
        )
    }

    fn expected_postings() -> BTreeSet<Posting> {
        [
            ("abcd", 0),
            ("bcde", 0),
            ("cdef", 0),
            ("bcde", 3),
            ("cdef", 3),
            ("defg", 3),
        ]
        .into_iter()
        .map(|(ngram, id)| Posting::new(ngram, RecordId(id)))
        .collect()
    }

    #[test]
    fn test_state_transitions() {
        use PipelineState::*;
        assert!(Idle.can_transition_to(Resuming));
        assert!(Resuming.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Flushing));
        assert!(Flushing.can_transition_to(Streaming));
        assert!(Flushing.can_transition_to(Completed));
        assert!(Streaming.can_transition_to(Aborted));

        assert!(!Idle.can_transition_to(Completed));
        assert!(!Streaming.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Resuming));
        assert!(Completed.is_terminal());
        assert!(!Flushing.is_terminal());
        assert_eq!(Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_config_from_settings() {
        let settings = IndexingSettings {
            ngram_length: 3,
            batch_size: 50,
            max_retries: 2,
            malformed_policy: MalformedPolicy::Abort,
            ..Default::default()
        };
        let config = PipelineConfig::from_settings(&settings);
        assert_eq!(config.ngram_length, 3);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.writer.max_retries, 2);
        assert_eq!(config.malformed_policy, MalformedPolicy::Abort);
    }

    #[tokio::test]
    async fn test_pipeline_indexes_all_records() {
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::default());

        let report = pipeline(sample_records(), fast_config(2), store.clone(), checkpoints.clone())
            .run(CancellationToken::new())
            .await;

        assert!(report.is_completed(), "error: {:?}", report.error);
        assert_eq!(store.snapshot(), expected_postings());
        assert_eq!(report.stats.records_read, 4);
        assert_eq!(report.stats.records_skipped, 1);
        assert_eq!(report.stats.short_records, 1);
        assert_eq!(report.stats.postings_generated, 6);
        assert_eq!(report.stats.postings_written, 6);
        assert_eq!(report.stats.batches_written, 3);
        assert_eq!(report.stats.batches_retried, 0);

        let saved = checkpoints.load("ngrams").unwrap().unwrap();
        assert_eq!(saved.last_record_id, Some(RecordId(3)));
        assert_eq!(saved.records_indexed, 4);
        assert_eq!(report.resume_after(), Some(RecordId(3)));
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_records() {
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::default());
        checkpoints
            .save(&Checkpoint::at("ngrams", RecordId(1), 2))
            .unwrap();

        let report = pipeline(sample_records(), fast_config(100), store.clone(), checkpoints.clone())
            .run(CancellationToken::new())
            .await;

        assert!(report.is_completed());
        assert_eq!(report.stats.records_read, 2);
        assert_eq!(report.stats.records_skipped, 1);
        assert_eq!(report.stats.postings_generated, 3);
        let saved = checkpoints.load("ngrams").unwrap().unwrap();
        assert_eq!(saved.last_record_id, Some(RecordId(3)));
        assert_eq!(saved.records_indexed, 4);
    }

    #[tokio::test]
    async fn test_rerun_from_scratch_is_idempotent() {
        let store = Arc::new(MockIndexStore::default());

        for _ in 0..2 {
            let checkpoints = Arc::new(MemoryCheckpointStore::default());
            let report = pipeline(sample_records(), fast_config(2), store.clone(), checkpoints)
                .run(CancellationToken::new())
                .await;
            assert!(report.is_completed());
        }

        assert_eq!(store.snapshot(), expected_postings());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transient = || Some(WriteError::Transient("throttled".to_string()));
        let store = Arc::new(MockIndexStore::scripted(vec![transient(), transient()]));
        let checkpoints = Arc::new(MemoryCheckpointStore::default());

        let report = pipeline(sample_records(), fast_config(100), store.clone(), checkpoints)
            .run(CancellationToken::new())
            .await;

        assert!(report.is_completed());
        assert_eq!(report.stats.batches_written, 1);
        assert_eq!(report.stats.batches_retried, 1);
        assert_eq!(report.stats.write_attempts, 3);
        assert_eq!(report.stats.postings_written, 6);
        assert_eq!(store.snapshot(), expected_postings());
    }

    #[tokio::test]
    async fn test_fatal_write_aborts_at_last_good_checkpoint() {
        let store = Arc::new(MockIndexStore::scripted(vec![
            None,
            Some(WriteError::Fatal("schema rejected".to_string())),
        ]));
        let checkpoints = Arc::new(MemoryCheckpointStore::default());
        let records = vec![
            Record::new(RecordId(0), "abcde", 1),
            Record::new(RecordId(1), "wxyz1", 1),
            Record::new(RecordId(2), "qrst", 1),
        ];

        let report = pipeline(records, fast_config(2), store.clone(), checkpoints.clone())
            .run(CancellationToken::new())
            .await;

        assert_eq!(report.state, PipelineState::Aborted);
        let error = report.error.as_ref().unwrap();
        assert!(!error.is_retry_exhaustion());
        let failed = error.failed_batch().unwrap();
        assert_eq!(failed.through, Some(RecordId(1)));
        assert_eq!(failed.len(), 2);

        assert_eq!(report.resume_after(), Some(RecordId(0)));
        let saved = checkpoints.load("ngrams").unwrap().unwrap();
        assert_eq!(saved.last_record_id, Some(RecordId(0)));
        assert_eq!(report.stats.records_read, 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_aborts() {
        let store = Arc::new(MockIndexStore::scripted(vec![
            Some(WriteError::Transient("timed out".to_string()));
            10
        ]));
        let checkpoints = Arc::new(MemoryCheckpointStore::default());

        let report = pipeline(sample_records(), fast_config(100), store.clone(), checkpoints)
            .run(CancellationToken::new())
            .await;

        assert_eq!(report.state, PipelineState::Aborted);
        assert!(report.error.as_ref().unwrap().is_retry_exhaustion());
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.stats.write_attempts, 4);
        assert_eq!(report.checkpoint, None);
    }

    #[tokio::test]
    async fn test_malformed_abort_policy() {
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::default());
        let config = fast_config(100).with_malformed_policy(MalformedPolicy::Abort);

        let report = pipeline(sample_records(), config, store.clone(), checkpoints)
            .run(CancellationToken::new())
            .await;

        assert_eq!(report.state, PipelineState::Aborted);
        assert!(matches!(
            report.error,
            Some(IndexingError::MalformedRecord {
                record_id: RecordId(2)
            })
        ));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline(sample_records(), fast_config(2), store.clone(), checkpoints)
            .run(cancel)
            .await;

        assert_eq!(report.state, PipelineState::Aborted);
        assert!(matches!(report.error, Some(IndexingError::Cancelled)));
        assert_eq!(report.stats.records_read, 0);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_counts_attempts() {
        let transient = || Some(WriteError::Transient("throttled".to_string()));
        let store = Arc::new(MockIndexStore::scripted(vec![
            None,
            transient(),
            transient(),
            transient(),
        ]));
        let checkpoints = Arc::new(MemoryCheckpointStore::default());
        let config = fast_config(2).with_writer_config(WriterConfig {
            max_retries: 3,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(60),
        });
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let report = pipeline(sample_records(), config, store.clone(), checkpoints)
            .run(cancel)
            .await;

        assert_eq!(report.state, PipelineState::Aborted);
        assert!(matches!(report.error, Some(IndexingError::Cancelled)));
        assert_eq!(report.stats.batches_written, 1);
        assert_eq!(report.stats.write_attempts, 2);
        assert_eq!(
            report.stats.write_attempts,
            store.calls.load(Ordering::SeqCst) as u64
        );
    }

    #[tokio::test]
    async fn test_checkpoint_failure_aborts() {
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore {
            fail_saves: true,
            ..Default::default()
        });

        let report = pipeline(sample_records(), fast_config(2), store, checkpoints)
            .run(CancellationToken::new())
            .await;

        assert_eq!(report.state, PipelineState::Aborted);
        assert!(matches!(report.error, Some(IndexingError::Checkpoint(_))));
        assert_eq!(report.checkpoint, None);
    }

    #[tokio::test]
    async fn test_records_without_postings_still_advance_checkpoint() {
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::default());
        let records = vec![
            Record::new(RecordId(4), "ab", 1),
            Record::new(RecordId(9), "", 1),
        ];

        let report = pipeline(records, fast_config(2), store.clone(), checkpoints)
            .run(CancellationToken::new())
            .await;

        assert!(report.is_completed());
        assert_eq!(report.stats.short_records, 2);
        assert_eq!(report.stats.batches_written, 0);
        assert_eq!(report.resume_after(), Some(RecordId(9)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_progress_reported_at_interval() {
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::default());
        let progress = Arc::new(CountingProgress::default());
        let records = (0..5)
            .map(|i| Record::new(RecordId(i), format!("HASH{}", i), 1))
            .collect();

        let report = pipeline(
            records,
            fast_config(100).with_progress_interval(2),
            store,
            checkpoints,
        )
        .with_progress(progress.clone())
        .run(CancellationToken::new())
        .await;

        assert!(report.is_completed());
        assert_eq!(*progress.starts.lock().unwrap(), vec![Some(5)]);
        // records 2 and 4, then the final report
        assert_eq!(progress.updates.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pipeline_with_storage_checkpoints() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let store = Arc::new(MockIndexStore::default());
        let checkpoints = Arc::new(StorageCheckpointStore::new(storage.clone()));

        let report = pipeline(sample_records(), fast_config(2), store, checkpoints.clone())
            .run(CancellationToken::new())
            .await;
        assert!(report.is_completed());

        let saved = checkpoints.load("ngrams").unwrap().unwrap();
        assert_eq!(saved.last_record_id, Some(RecordId(3)));
        assert_eq!(storage.list_checkpoints().unwrap().len(), 1);
    }
}
