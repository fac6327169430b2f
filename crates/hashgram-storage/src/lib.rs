//! Storage layer for hashgram.
//!
//! Provides RocksDB-backed storage with:
//! - An append-only record store keyed by monotonic record id
//! - The n-gram posting index, keyed by `(ngram, record_id)` so repeated
//!   writes collapse into one entry
//! - Durable per-partition checkpoints for resumable indexing
//! - A bulk loader for `HASH:COUNT` text dumps

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod loader;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{CheckpointKey, PostingKey, RecordKey};
pub use loader::{LoadStats, RecordLoader};
