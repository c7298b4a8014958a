//! Error types for BurrowDB
//!
//! This module defines the common error type used throughout the engine.

use thiserror::Error;

/// Common result type for BurrowDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for BurrowDB
#[derive(Debug, Error)]
pub enum Error {
    // Key space errors
    #[error("key not found: {0}")]
    KeyNotFound(String),

    // Index errors
    #[error("index already exists: {0}")]
    DuplicateIndex(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("invalid comparator argument: {0}")]
    InvalidComparatorArgument(String),

    // Transaction errors
    #[error("transaction is no longer open")]
    InvalidTransactionState,

    #[error("a read-write transaction is already open")]
    WriterBusy,

    #[error("write operation in a read-only transaction")]
    ReadOnly,

    // Persistence errors
    #[error("persistence log error: {0}")]
    PersistenceIo(String),

    #[error("corrupt persistence log: {0}")]
    CorruptLog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceIo(msg.into())
    }

    /// Create a corrupt-log error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptLog(msg.into())
    }

    /// Check if this is a missing-key error
    #[must_use]
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }

    /// Check if this is any not-found error (key or index)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_) | Self::IndexNotFound(_))
    }

    /// Check if this error is fatal to the open database instance
    ///
    /// A fatal error means durability can no longer be guaranteed and the
    /// instance refuses further write transactions until reopened.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PersistenceIo(_) | Self::CorruptLog(_) | Self::Io(_)
        )
    }
}
