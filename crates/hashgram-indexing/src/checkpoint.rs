//! Checkpoint tracking for the indexing pipeline.
//!
//! A checkpoint records the last record id whose postings are durably in
//! the index, per partition. A restarted run resumes strictly after it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use hashgram_storage::Storage;
use hashgram_types::RecordId;

use crate::error::IndexingError;

/// Partition key used by single-partition runs.
pub const DEFAULT_PARTITION: &str = "ngrams";

/// Durable progress marker for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Partition this checkpoint belongs to
    pub partition: String,

    /// Last record whose postings are all written; `None` before the first
    pub last_record_id: Option<RecordId>,

    /// Records covered by this checkpoint across all runs
    pub records_indexed: u64,

    /// Timestamp of the last save (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,

    /// When this partition was first checkpointed (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create an empty checkpoint for the given partition
    pub fn new(partition: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            partition: partition.into(),
            last_record_id: None,
            records_indexed: 0,
            updated_at: now,
            created_at: now,
        }
    }

    #[cfg(test)]
    pub(crate) fn at(
        partition: impl Into<String>,
        record_id: RecordId,
        records_indexed: u64,
    ) -> Self {
        let mut checkpoint = Self::new(partition);
        checkpoint.last_record_id = Some(record_id);
        checkpoint.records_indexed = records_indexed;
        checkpoint
    }

    /// Move forward to `record_id`.
    ///
    /// Returns `false` and leaves the checkpoint untouched when `record_id`
    /// is not past the current position.
    pub fn advance(&mut self, record_id: RecordId, records_indexed: u64) -> bool {
        if self.last_record_id.is_some_and(|current| current >= record_id) {
            return false;
        }
        self.last_record_id = Some(record_id);
        self.records_indexed = records_indexed;
        self.updated_at = Utc::now();
        true
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexingError> {
        serde_json::to_vec(self).map_err(IndexingError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexingError> {
        serde_json::from_slice(bytes).map_err(IndexingError::from)
    }
}

/// Durable `partition -> checkpoint` persistence.
///
/// `save` must not return before the checkpoint survives a crash.
pub trait CheckpointStore: Send + Sync {
    /// Last saved checkpoint, or `None` on a first run.
    fn load(&self, partition: &str) -> Result<Option<Checkpoint>, IndexingError>;

    /// Persist a checkpoint durably.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError>;
}

/// Checkpoints kept in the `checkpoints` column family.
pub struct StorageCheckpointStore {
    storage: Arc<Storage>,
}

impl StorageCheckpointStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl CheckpointStore for StorageCheckpointStore {
    fn load(&self, partition: &str) -> Result<Option<Checkpoint>, IndexingError> {
        let bytes = self
            .storage
            .get_checkpoint(partition)
            .map_err(|e| IndexingError::Checkpoint(format!("load {}: {}", partition, e)))?;

        bytes.map(|b| Checkpoint::from_bytes(&b)).transpose()
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError> {
        if let Some(existing) = self.load(&checkpoint.partition)? {
            if existing.last_record_id > checkpoint.last_record_id {
                return Err(IndexingError::Checkpoint(format!(
                    "refusing to move {} back from {:?} to {:?}",
                    checkpoint.partition, existing.last_record_id, checkpoint.last_record_id
                )));
            }
        }

        let bytes = checkpoint.to_bytes()?;
        self.storage
            .put_checkpoint(&checkpoint.partition, &bytes)
            .map_err(|e| IndexingError::Checkpoint(format!("save {}: {}", checkpoint.partition, e)))?;

        debug!(
            partition = %checkpoint.partition,
            last_record_id = ?checkpoint.last_record_id,
            "Saved checkpoint"
        );
        Ok(())
    }
}

/// All checkpoints saved in `storage`, ordered by partition key.
pub fn list_checkpoints(storage: &Storage) -> Result<Vec<Checkpoint>, IndexingError> {
    storage
        .list_checkpoints()?
        .into_iter()
        .map(|(_, bytes)| Checkpoint::from_bytes(&bytes))
        .collect()
}
