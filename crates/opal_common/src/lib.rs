//! Shared foundational types for the Opal compilation cache.
//!
//! This crate provides the content hashing primitive used to fingerprint
//! source files and their transitive import closures.

#![warn(missing_docs)]

pub mod hash;

pub use hash::ContentHash;
