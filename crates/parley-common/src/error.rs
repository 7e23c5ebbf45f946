//! Common error types for Parley.

use thiserror::Error;

/// Result type alias using Parley's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for shared Parley infrastructure.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}
