//! Error types for store operations.

use std::path::PathBuf;

/// Errors that can occur while talking to the persistent store.
///
/// Callers treat read errors as cache misses; write errors are logged and
/// dropped. This enum is used for internal propagation within the store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The underlying database reported an error.
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An I/O error occurred while managing the database file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A payload could not be compressed or decompressed.
    #[error("cache payload compression error: {source}")]
    Compression {
        /// The underlying compression error.
        source: std::io::Error,
    },

    /// The store was used after `close()`.
    #[error("cache store is closed")]
    Closed,
}
