//! Hashgram binary library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (load, index, status, lookup, admin)

pub mod cli;
pub mod commands;

pub use cli::{AdminCommands, Cli, Commands};
pub use commands::{
    dispatch, format_summary, handle_admin, init_tracing, load_dump, load_settings, lookup,
    open_storage, run_index, show_status, EXIT_ABORTED, EXIT_STARTUP,
};
