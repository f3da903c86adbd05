//! Timestamp source for access tracking and eviction.

use std::time::{SystemTime, UNIX_EPOCH};

/// Provides the current time in milliseconds since the Unix epoch.
///
/// Injected into the store so that tests can control last-access
/// timestamps deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp in milliseconds.
    fn now_millis(&self) -> i64;
}

/// A `Clock` backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
