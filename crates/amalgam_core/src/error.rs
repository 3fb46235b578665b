//! # Core Error Types
//!
//! Errors raised while loading or validating unit configuration.

use thiserror::Error;

/// Errors that can occur in the core unit model.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The attribute table file could not be read.
    #[error("failed to read attribute table {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The attribute table is not valid TOML or has the wrong shape.
    #[error("failed to parse attribute table: {0}")]
    Parse(#[from] toml::de::Error),

    /// The attribute table parsed but breaks an invariant.
    #[error("invalid attribute table: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
