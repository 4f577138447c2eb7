//! Error types for the `hashbench` crate

use std::path::PathBuf;

/// Errors reported by the hash tables, their configuration and the monitoring layer
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No legal bucket could be found for a new key within the configured probing bound.
    ///
    /// This is a clustering failure, not necessarily a full table: the table keeps its
    /// contents and the caller may continue with other operations.
    #[error("insertion failed: no legal bucket within {probes} probes")]
    CapacityExceeded {
        /// The probing budget that was exhausted
        probes: usize,
    },

    /// The key is not stored in the table.
    #[error("key not found")]
    KeyNotFound,

    /// The sizing parameters of a table are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The table was closed and must be opened again before use.
    #[error("hash table is not open")]
    NotOpen,

    /// Reading or writing a file failed.
    #[error("i/o failure on {path:?}: {source}")]
    Io {
        /// The file that was being accessed
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// A snapshot or configuration could not be encoded or decoded as JSON.
    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
