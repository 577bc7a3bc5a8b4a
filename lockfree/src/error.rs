//! Error types for queue operations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by blocking queue operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Nothing was enqueued before the deadline
    #[error("no value arrived within {0:?}")]
    Timeout(Duration),
}

/// The allocator could not provide a node; the value is handed back.
#[derive(Error, Clone, PartialEq, Eq)]
#[error("out of memory while allocating a queue node")]
pub struct TryEnqueueError<T> {
    /// The value that was not enqueued
    pub value: T,
}

impl<T> TryEnqueueError<T> {
    /// Takes the value back.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for TryEnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryEnqueueError").finish_non_exhaustive()
    }
}

/// Result alias for queue operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
