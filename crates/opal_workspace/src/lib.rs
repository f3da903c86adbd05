//! Incremental compilation caching in front of a live compilation service.
//!
//! The compilation service is treated as an opaque oracle: given the full
//! content of a file network, operations like emitting a file or computing
//! its diagnostics are pure functions of that content. This crate fronts
//! such a service with [`CachingWorkspace`], which fingerprints every file
//! by a recursive content hash spanning its transitive imports (cycles
//! included) and replays previously computed results from a persistent
//! store whenever the fingerprint matches.

#![warn(missing_docs)]

pub mod caching;
pub mod container;
pub mod error;
mod files;
mod resolver;
pub mod tracker;
pub mod workspace;

pub use caching::CachingWorkspace;
pub use container::Container;
pub use error::WorkspaceError;
pub use tracker::{CircularLoopTracker, PushOutcome};
pub use workspace::{DiagnosticsResult, ImportPath, OpenFileResult, Workspace};
