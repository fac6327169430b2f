//! CLI argument parsing for the hashgram binary.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

use hashgram_types::MalformedPolicy;

/// Hashgram
///
/// Builds and inspects an n-gram inverted index over hash records.
#[derive(Parser, Debug)]
#[command(name = "hashgram")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/hashgram/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a HASH:COUNT dump into the record store
    Load {
        /// Dump file to read
        file: String,

        /// Records per write batch
        #[arg(long, default_value = "100000")]
        batch_size: usize,
    },

    /// Build or resume the n-gram index
    Index {
        /// N-gram length
        #[arg(short = 'k', long)]
        ngram_length: Option<usize>,

        /// Maximum postings per write batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Retries per batch after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// First retry delay in milliseconds
        #[arg(long)]
        backoff_base_ms: Option<u64>,

        /// Number of id-range partitions indexed concurrently
        #[arg(short, long)]
        partitions: Option<usize>,

        /// Records without a usable hash: skip or abort
        #[arg(long)]
        malformed_policy: Option<MalformedPolicy>,
    },

    /// Show saved checkpoints
    Status,

    /// List record ids posted under an n-gram
    Lookup {
        /// N-gram to look up
        ngram: String,
    },

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

/// Admin subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AdminCommands {
    /// Show database statistics
    Stats,

    /// Delete saved checkpoints so the next run starts from scratch
    Reset {
        /// Only reset this partition key
        #[arg(long)]
        partition: Option<String>,
    },

    /// Trigger RocksDB compaction
    Compact,
}
