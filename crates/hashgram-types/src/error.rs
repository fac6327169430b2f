//! Error types for the hashgram system.

use thiserror::Error;

/// Settings that could not be loaded or failed validation.
#[derive(Debug, Error)]
pub enum HashgramError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
