//! N-gram indexing pipeline for hashgram.
//!
//! Streams records out of the record store, splits each hash into its
//! distinct n-grams, and bulk-writes the resulting postings to an index
//! store with resumable, partition-scoped checkpoints.
//!
//! ## Key Components
//!
//! - [`tokenize`]: record hash -> distinct n-grams
//! - [`PostingBatcher`]: bounds postings into write batches
//! - [`IndexWriter`]: bulk writes with exponential-backoff retry
//! - [`CheckpointStore`]: durable per-partition progress
//! - [`IndexingPipeline`]: the read/tokenize/batch/write state machine
//! - [`PartitionRunner`]: one pipeline per disjoint id range
//!
//! ## Guarantees
//!
//! Postings are delivered at least once. A checkpoint only moves past a
//! record after every batch holding its postings is acknowledged, and the
//! index store upserts by `(ngram, record_id)`, so re-running any suffix
//! of the source leaves the index unchanged.
//!
//! ## Example
//!
//! ```ignore
//! use hashgram_indexing::{PartitionRunner, PipelineConfig};
//!
//! let report = PartitionRunner::new(storage, PipelineConfig::default())
//!     .with_partitions(4)
//!     .run(cancel)
//!     .await?;
//! assert!(report.is_completed());
//! ```

pub mod batcher;
pub mod checkpoint;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod tokenizer;
pub mod writer;

pub use batcher::{Batch, PostingBatcher};
pub use checkpoint::{
    list_checkpoints, Checkpoint, CheckpointStore, StorageCheckpointStore, DEFAULT_PARTITION,
};
pub use error::{IndexingError, WriteError};
pub use partition::{run_partitioned, PartitionPlan, PartitionRunner, PartitionedReport};
pub use pipeline::{IndexingPipeline, PipelineConfig, PipelineReport, PipelineState};
pub use progress::{LoggingProgressCallback, NoOpProgressCallback, PipelineStats, ProgressCallback};
pub use source::{RecordRange, RecordSource, StorageRecordSource, VecRecordSource};
pub use tokenizer::{ngrams, tokenize, Tokens};
pub use writer::{IndexStore, IndexWriter, RocksIndexStore, WriteResult, WriterConfig};
