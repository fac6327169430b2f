//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - records: Append-only `{hash, count}` rows keyed by record id (Zstd)
//! - postings: The n-gram inverted index, empty values, keyed by `(ngram, id)`
//! - checkpoints: Per-partition indexing progress

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for source records
pub const CF_RECORDS: &str = "records";

/// Column family name for n-gram postings
pub const CF_POSTINGS: &str = "postings";

/// Column family name for pipeline checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_RECORDS, CF_POSTINGS, CF_CHECKPOINTS];

/// Records are written once and scanned sequentially
fn records_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Postings are tiny keys with shared ngram prefixes
fn postings_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_RECORDS, records_options()),
        ColumnFamilyDescriptor::new(CF_POSTINGS, postings_options()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
    ]
}
