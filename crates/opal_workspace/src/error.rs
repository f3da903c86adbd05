//! Error types for the caching workspace.

use std::path::PathBuf;

use opal_cache::CacheError;

/// Errors surfaced by the caching workspace.
///
/// Store read failures never appear here (they degrade to cache misses);
/// live-service failures propagate through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// A file's content could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A file was referenced before any content was registered for it.
    #[error("no content registered for {}", path.display())]
    UnknownFile {
        /// The unresolvable path.
        path: PathBuf,
    },

    /// Wraps an error encountered while gathering a file's dependencies.
    #[error("while gathering dependencies of {}: {source}", path.display())]
    Dependency {
        /// The file whose dependencies were being gathered.
        path: PathBuf,
        /// The underlying error.
        source: Box<WorkspaceError>,
    },

    /// The recursive hash fixed point made a full pass without finalizing
    /// anything. This indicates a cycle-exclusion defect, not a runtime
    /// condition to recover from.
    #[error("recursive hash resolution made no progress with {pending} files pending")]
    HashResolutionStalled {
        /// Number of files still awaiting a hash.
        pending: usize,
    },

    /// A recursive hash was required but had not been resolved.
    #[error("recursive hash for {} was not resolved before use", path.display())]
    UnresolvedHash {
        /// The file missing its hash.
        path: PathBuf,
    },

    /// The persistent store failed during initialization or shutdown.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The live compilation service reported a failure.
    #[error("compilation service error: {message}")]
    Service {
        /// Description from the service.
        message: String,
    },
}
