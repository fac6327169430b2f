//! Key encoding and decoding for storage layer.
//!
//! Numeric components are zero-padded to 20 digits so lexicographic key
//! order matches numeric order, which lets range scans double as cursors.
//!
//! - records: `rec:{record_id:020}`
//! - postings: `ng:{ngram}:{record_id:020}`
//! - checkpoints: `checkpoint:{partition}`

use hashgram_types::RecordId;

use crate::error::StorageError;

const RECORD_PREFIX: &str = "rec:";
const POSTING_PREFIX: &str = "ng:";
const CHECKPOINT_PREFIX: &str = "checkpoint:";

/// Key for record storage
/// Format: rec:{record_id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordKey {
    pub record_id: RecordId,
}

impl RecordKey {
    pub fn new(record_id: RecordId) -> Self {
        Self { record_id }
    }

    /// Encode key to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{:020}", RECORD_PREFIX, self.record_id.0).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let digits = s
            .strip_prefix(RECORD_PREFIX)
            .ok_or_else(|| StorageError::Key(format!("Invalid record key format: {}", s)))?;
        let id: u64 = digits
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid record id: {}", e)))?;

        Ok(Self {
            record_id: RecordId(id),
        })
    }

    /// Prefix shared by every record key
    pub fn prefix() -> &'static [u8] {
        RECORD_PREFIX.as_bytes()
    }
}

/// Key for one posting of the inverted index
/// Format: ng:{ngram}:{record_id:020}
///
/// All ngrams of one index share the same length, so `ng:{ngram}:` is an
/// unambiguous scan prefix even when the ngram itself contains `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingKey {
    pub ngram: String,
    pub record_id: RecordId,
}

impl PostingKey {
    pub fn new(ngram: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            ngram: ngram.into(),
            record_id,
        }
    }

    /// Encode key to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}:{:020}", POSTING_PREFIX, self.ngram, self.record_id.0).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let body = s
            .strip_prefix(POSTING_PREFIX)
            .ok_or_else(|| StorageError::Key(format!("Invalid posting key format: {}", s)))?;
        let (ngram, digits) = body
            .rsplit_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid posting key format: {}", s)))?;
        let id: u64 = digits
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid record id: {}", e)))?;

        Ok(Self {
            ngram: ngram.to_string(),
            record_id: RecordId(id),
        })
    }

    /// Scan prefix for all postings of one ngram
    pub fn ngram_prefix(ngram: &str) -> Vec<u8> {
        format!("{}{}:", POSTING_PREFIX, ngram).into_bytes()
    }
}

/// Key for checkpoint entries
/// Format: checkpoint:{partition}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    /// Partition key (e.g., "ngrams", "ngrams-p0of4")
    pub partition: String,
}

impl CheckpointKey {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}", CHECKPOINT_PREFIX, self.partition).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let partition = s
            .strip_prefix(CHECKPOINT_PREFIX)
            .ok_or_else(|| StorageError::Key(format!("Invalid checkpoint key format: {}", s)))?;
        Ok(Self::new(partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_roundtrip() {
        let key = RecordKey::new(RecordId(12345));
        assert_eq!(key.to_bytes(), b"rec:00000000000000012345".to_vec());
        let decoded = RecordKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_record_key_lexicographic_order() {
        let low = RecordKey::new(RecordId(9)).to_bytes();
        let high = RecordKey::new(RecordId(10)).to_bytes();
        assert!(low < high);
    }

    #[test]
    fn test_record_key_rejects_other_prefix() {
        assert!(RecordKey::from_bytes(b"ng:abcd:00000000000000000001").is_err());
    }

    #[test]
    fn test_posting_key_with_colon_in_ngram() {
        let key = PostingKey::new("a:bc", RecordId(7));
        let decoded = PostingKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded.ngram, "a:bc");
        assert_eq!(decoded.record_id, RecordId(7));
        assert!(key.to_bytes().starts_with(&PostingKey::ngram_prefix("a:bc")));
    }

    #[test]
    fn test_posting_prefix_does_not_match_neighbour_ngram() {
        let key = PostingKey::new("abce", RecordId(1)).to_bytes();
        assert!(!key.starts_with(&PostingKey::ngram_prefix("abcd")));
    }

    #[test]
    fn test_checkpoint_key_roundtrip() {
        let key = CheckpointKey::new("ngrams-p1of4");
        assert_eq!(key.to_bytes(), b"checkpoint:ngrams-p1of4".to_vec());
        assert_eq!(CheckpointKey::from_bytes(&key.to_bytes()).unwrap(), key);
    }
}
