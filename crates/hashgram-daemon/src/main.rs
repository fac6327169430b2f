//! Hashgram
//!
//! Builds a resumable n-gram inverted index over a store of hash records.
//!
//! # Usage
//!
//! ```bash
//! hashgram load hashes.txt
//! hashgram index [--ngram-length K] [--batch-size N] [--partitions N]
//! hashgram status
//! hashgram lookup 5AD7
//! hashgram admin stats|reset|compact
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/hashgram/config.toml)
//! 3. Environment variables (HASHGRAM_*)
//! 4. CLI flags
//!
//! # Exit status
//!
//! 0 on success, 1 when a run aborts or is cancelled, 2 when configuration
//! or startup fails.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use hashgram_daemon::{
    dispatch, init_tracing, load_settings, open_storage, Cli, EXIT_ABORTED, EXIT_STARTUP,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    if let Err(e) = init_tracing(&settings.log_level) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_STARTUP);
    }
    let storage = match open_storage(&settings) {
        Ok(storage) => storage,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    match dispatch(storage, &settings, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ABORTED)
        }
    }
}
