//! Partitioned indexing.
//!
//! Splits the record store into disjoint id ranges and runs one
//! [`IndexingPipeline`] per range concurrently. Partitions share nothing but
//! the index store: each has its own batcher, writer, source, and
//! checkpoint key, so each resumes independently.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hashgram_storage::Storage;
use hashgram_types::{IndexingSettings, RecordId};

use crate::checkpoint::{CheckpointStore, StorageCheckpointStore, DEFAULT_PARTITION};
use crate::error::IndexingError;
use crate::pipeline::{IndexingPipeline, PipelineConfig, PipelineReport};
use crate::progress::{NoOpProgressCallback, PipelineStats, ProgressCallback};
use crate::source::{RecordRange, StorageRecordSource};
use crate::writer::{IndexStore, RocksIndexStore};

/// Disjoint contiguous id ranges covering the record store.
///
/// The first range is unbounded below and the last unbounded above, so
/// records appended after planning land in the last partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    ranges: Vec<RecordRange>,
}

impl PartitionPlan {
    /// Split `[first, last]` into `n` ranges of near-equal id span.
    pub fn split(first: RecordId, last: RecordId, n: usize) -> Self {
        let n = n.max(1);
        let span = last.0.saturating_sub(first.0).saturating_add(1);
        let chunk = span.div_ceil(n as u64).max(1);

        let bounds: Vec<RecordId> = (1..n as u64)
            .map(|i| RecordId(first.0.saturating_add(chunk.saturating_mul(i))))
            .collect();

        let mut ranges = Vec::with_capacity(n);
        let mut start = None;
        for bound in bounds {
            ranges.push(RecordRange::new(start, Some(bound)));
            start = Some(bound);
        }
        ranges.push(RecordRange::new(start, None));

        Self { ranges }
    }

    pub fn ranges(&self) -> &[RecordRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Checkpoint key of partition `index` out of `count`.
    pub fn partition_key(index: usize, count: usize) -> String {
        if count <= 1 {
            DEFAULT_PARTITION.to_string()
        } else {
            format!("{}-p{}of{}", DEFAULT_PARTITION, index, count)
        }
    }
}

/// Combined outcome of a partitioned run, ordered by partition key.
#[derive(Debug, Default)]
pub struct PartitionedReport {
    pub reports: Vec<PipelineReport>,
}

impl PartitionedReport {
    /// Completed only if every partition completed.
    pub fn is_completed(&self) -> bool {
        !self.reports.is_empty() && self.reports.iter().all(PipelineReport::is_completed)
    }

    /// Counters summed over all partitions.
    pub fn totals(&self) -> PipelineStats {
        let mut totals = PipelineStats::default();
        for report in &self.reports {
            totals.merge(&report.stats);
        }
        totals
    }

    /// Reports of partitions that aborted.
    pub fn aborted(&self) -> impl Iterator<Item = &PipelineReport> {
        self.reports.iter().filter(|r| !r.is_completed())
    }
}

/// Builds and runs one pipeline per partition.
pub struct PartitionRunner {
    storage: Arc<Storage>,
    config: PipelineConfig,
    partitions: usize,
    page_size: usize,
    index_store: Arc<dyn IndexStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    progress: Arc<dyn ProgressCallback>,
}

impl PartitionRunner {
    /// Runner writing postings and checkpoints to `storage`.
    pub fn new(storage: Arc<Storage>, config: PipelineConfig) -> Self {
        Self {
            index_store: Arc::new(RocksIndexStore::new(storage.clone())),
            checkpoints: Arc::new(StorageCheckpointStore::new(storage.clone())),
            storage,
            config,
            partitions: 1,
            page_size: 1024,
            progress: Arc::new(NoOpProgressCallback),
        }
    }

    pub fn from_settings(storage: Arc<Storage>, settings: &IndexingSettings) -> Self {
        Self::new(storage, PipelineConfig::from_settings(settings))
            .with_partitions(settings.partitions)
            .with_page_size(settings.source_page_size)
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_index_store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.index_store = store;
        self
    }

    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every partition to its end and collect the reports.
    ///
    /// A partition that aborts does not stop its siblings. Only a failure
    /// to plan the run, or a partition task that panics, returns `Err`.
    pub async fn run(self, cancel: CancellationToken) -> Result<PartitionedReport, IndexingError> {
        let (first, last) = self
            .storage
            .record_id_bounds()?
            .unwrap_or((RecordId(0), RecordId(0)));
        let plan = PartitionPlan::split(first, last, self.partitions);
        info!(
            partitions = plan.len(),
            first = %first,
            last = %last,
            store = self.index_store.name(),
            "Starting indexing run"
        );

        let mut tasks = JoinSet::new();
        for (index, range) in plan.ranges().iter().enumerate() {
            let key = PartitionPlan::partition_key(index, plan.len());
            let source = StorageRecordSource::new(self.storage.clone(), *range, self.page_size);
            let pipeline = IndexingPipeline::new(
                key,
                self.config.clone(),
                Box::new(source),
                self.index_store.clone(),
                self.checkpoints.clone(),
            )
            .with_progress(self.progress.clone());
            tasks.spawn(pipeline.run(cancel.clone()));
        }

        let mut reports = Vec::with_capacity(plan.len());
        let mut panicked = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(error = %e, "Partition task failed");
                    panicked = Some(IndexingError::from(e));
                }
            }
        }
        if let Some(err) = panicked {
            return Err(err);
        }

        reports.sort_by(|a, b| a.partition.cmp(&b.partition));
        Ok(PartitionedReport { reports })
    }
}

/// Index `storage` in place using `settings`.
pub async fn run_partitioned(
    storage: Arc<Storage>,
    settings: &IndexingSettings,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
) -> Result<PartitionedReport, IndexingError> {
    PartitionRunner::from_settings(storage, settings)
        .with_progress(progress)
        .run(cancel)
        .await
}
