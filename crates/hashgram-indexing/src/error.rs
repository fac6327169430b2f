//! Error types for the indexing pipeline.
//!
//! Record-level problems are absorbed by the pipeline and counted; only
//! batch-level and checkpoint-level failures surface as [`IndexingError`]
//! and end a run.

use hashgram_storage::StorageError;
use hashgram_types::RecordId;
use thiserror::Error;

use crate::batcher::Batch;
use crate::pipeline::PipelineState;

/// Outcome of a single failed bulk-write attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Timeout, throttling, connection reset: the same batch may succeed later
    #[error("transient write failure: {0}")]
    Transient(String),

    /// Authentication failure, schema rejection, malformed batch
    #[error("fatal write failure: {0}")]
    Fatal(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

impl From<StorageError> for WriteError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            WriteError::Transient(err.to_string())
        } else {
            WriteError::Fatal(err.to_string())
        }
    }
}

/// Errors that end an indexing run
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Checkpoint could not be loaded or durably saved
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record without a usable hash under the abort policy
    #[error("Malformed record {record_id}: missing or invalid hash")]
    MalformedRecord { record_id: RecordId },

    /// A batch could not be written; the batch is handed back unwritten
    #[error("Write of {} postings failed after {attempts} attempt(s): {source}", .batch.len())]
    FatalWrite {
        batch: Box<Batch>,
        attempts: u32,
        source: WriteError,
    },

    /// The record source failed to produce the next record
    #[error("Record source error: {0}")]
    Source(String),

    /// Pipeline configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// State machine misuse
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: PipelineState, to: PipelineState },

    /// A spawned task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    /// Operator requested stop
    #[error("Run cancelled")]
    Cancelled,
}

impl IndexingError {
    /// Whether a write failed because transient retries ran out.
    pub fn is_retry_exhaustion(&self) -> bool {
        matches!(self, IndexingError::FatalWrite { source, .. } if source.is_transient())
    }

    /// The unwritten batch carried by a write failure.
    pub fn failed_batch(&self) -> Option<&Batch> {
        match self {
            IndexingError::FatalWrite { batch, .. } => Some(batch.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IndexingError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexingError::Task(err.to_string())
    }
}
