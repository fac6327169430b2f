//! Source records and the postings derived from them.
//!
//! Records are written once by the bulk loader and never mutated. The
//! indexing pipeline reads them in id order and emits one [`Posting`] per
//! distinct n-gram of the record's hash.

use serde::{Deserialize, Serialize};

/// Stable identifier of a record in the record store.
///
/// Ids are assigned monotonically by the loader and never reused, so they
/// double as the resume cursor: "after cursor X" means `id > X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// The id immediately following this one, if any.
    pub fn next(self) -> Option<RecordId> {
        self.0.checked_add(1).map(RecordId)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        RecordId(id)
    }
}

/// On-disk body of a record. The id lives in the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Hash string as it appeared in the source dump
    pub hash: String,
    /// Occurrence count from the source dump
    pub count: u64,
}

impl StoredRecord {
    /// Create a stored record body.
    pub fn new(hash: impl Into<String>, count: u64) -> Self {
        Self {
            hash: hash.into(),
            count,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A record as read back by the pipeline.
///
/// `hash` is `None` when the stored body has no usable hash field (missing,
/// null, not a string, or not a JSON object at all). Such records are
/// malformed and are never tokenized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub hash: Option<String>,
    pub count: u64,
}

impl Record {
    /// Create a well-formed record.
    pub fn new(id: impl Into<RecordId>, hash: impl Into<String>, count: u64) -> Self {
        Self {
            id: id.into(),
            hash: Some(hash.into()),
            count,
        }
    }

    /// Create a record with no usable hash.
    pub fn malformed(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            hash: None,
            count: 0,
        }
    }

    /// Decode a stored body leniently.
    ///
    /// Never fails: anything that does not carry a string `hash` yields a
    /// malformed record so the pipeline can count and skip it.
    pub fn from_stored(id: RecordId, bytes: &[u8]) -> Self {
        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(_) => return Self::malformed(id),
        };

        let hash = value
            .get("hash")
            .and_then(|h| h.as_str())
            .map(str::to_string);
        let count = value.get("count").and_then(|c| c.as_u64()).unwrap_or(0);

        Self { id, hash, count }
    }

    /// Whether the record carries a usable hash string.
    pub fn is_malformed(&self) -> bool {
        self.hash.is_none()
    }
}

/// One entry of the inverted index: `ngram -> record_id`.
///
/// The pair is the identity of a posting; writing the same pair twice is a
/// no-op for the index store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Posting {
    pub ngram: String,
    pub record_id: RecordId,
}

impl Posting {
    pub fn new(ngram: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            ngram: ngram.into(),
            record_id,
        }
    }
}
