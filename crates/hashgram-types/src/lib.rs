//! # hashgram-types
//!
//! Shared domain types for the hashgram n-gram indexer.
//!
//! - [`Record`]: an immutable `{id, hash, count}` row from the record store
//! - [`Posting`]: one `(ngram, record_id)` entry of the inverted index
//! - [`Settings`]: layered configuration for the binary and the pipeline
//!
//! ## Usage
//!
//! ```rust
//! use hashgram_types::{Posting, RecordId};
//!
//! let posting = Posting::new("abcd", RecordId(7));
//! assert_eq!(posting.record_id, RecordId(7));
//! ```

pub mod config;
pub mod error;
pub mod record;

pub use config::{IndexingSettings, MalformedPolicy, Settings};
pub use error::HashgramError;
pub use record::{Posting, Record, RecordId, StoredRecord};
