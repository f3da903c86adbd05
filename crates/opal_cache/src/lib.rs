//! Persistent compilation cache storage.
//!
//! This crate provides the durable key-value store backing the incremental
//! compilation cache: entries are keyed by `(path, container, hash)`, large
//! payloads are transparently compressed, reads are tracked with batched
//! last-access updates, and stale entries can be evicted by age. The store
//! is stamped with a schema version and silently recreated on mismatch.

#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod sqlite;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use error::CacheError;
pub use sqlite::SqliteStore;
pub use store::CompilationStore;
