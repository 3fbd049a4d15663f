//! Error types for partition coordination.
//!
//! # Error Handling Patterns
//!
//! Coordination code uses two patterns based on who is calling:
//!
//! ## Fail-Fast (Propagate Errors)
//!
//! Used by the [`SourceCoordinator`](super::SourceCoordinator) facade. Every
//! store failure is returned to the caller untouched, including a lost
//! conditional write. Retry policy belongs to the caller.
//!
//! ## Best-Effort (Log and Continue)
//!
//! Used by the long-running loops ([`LeaderScheduler`](super::LeaderScheduler),
//! [`PartitionWorker`](super::PartitionWorker)). A failed iteration is logged
//! and the loop sleeps until the next tick:
//!
//! ```text
//! if let Err(e) = self.lead().await {
//!     error!(error = %e, "Leader iteration failed");
//! }
//! ```
//!
//! # Lost Races
//!
//! [`CoordinationError::ConditionalWriteLost`] is an expected outcome, not a
//! fault: another node transitioned the record since we last read it. The
//! holder must assume its ownership is suspect and stop working on the
//! partition until it is acquired again.

use thiserror::Error;

/// Result type for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Errors that can occur while coordinating source partitions.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The stored record changed since the caller last read it.
    #[error(
        "Conditional write lost for {partition_type}/{partition_key}: expected version {expected_version}"
    )]
    ConditionalWriteLost {
        partition_type: String,
        partition_key: String,
        expected_version: u64,
    },

    /// No factory case exists for this partition type.
    #[error("Unsupported partition type '{0}'")]
    UnsupportedPartitionType(String),

    /// A partition of this type cannot be leased (e.g. global state).
    #[error("Partition type '{0}' cannot be acquired")]
    NotLeasable(String),

    /// The typed partition has no backing store record.
    ///
    /// Raised when a partition built locally (never created or acquired) is
    /// passed to an operation that writes through to the store.
    #[error("Partition {partition_type}/{partition_key} has no store record")]
    MissingStoreItem {
        partition_type: String,
        partition_key: String,
    },

    /// The partition key does not have the shape its type requires.
    #[error("Invalid partition key '{partition_key}' for {partition_type}: {reason}")]
    InvalidPartitionKey {
        partition_type: String,
        partition_key: String,
        reason: String,
    },

    /// Generic backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Error from object store operations.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Progress state (de)serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinationError {
    /// Build a [`CoordinationError::ConditionalWriteLost`] for a record.
    pub fn write_lost(record: &super::record::PartitionRecord) -> Self {
        CoordinationError::ConditionalWriteLost {
            partition_type: record.partition_type.clone(),
            partition_key: record.partition_key.clone(),
            expected_version: record.version,
        }
    }

    /// Check if another node won a race against this write.
    #[inline]
    pub fn is_conditional_write_lost(&self) -> bool {
        matches!(self, CoordinationError::ConditionalWriteLost { .. })
    }

    /// Check if this error indicates a programming or configuration mistake.
    ///
    /// Fatal errors are never retried by the loops in this crate.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinationError::UnsupportedPartitionType(_)
                | CoordinationError::NotLeasable(_)
                | CoordinationError::InvalidPartitionKey { .. }
                | CoordinationError::Config(_)
        )
    }

    /// Check if this error is retriable (transient infrastructure issue).
    #[inline]
    pub fn is_retriable(&self) -> bool {
        match self {
            CoordinationError::Storage(_) => true,
            CoordinationError::Io(e) => is_io_error_retryable(e),
            CoordinationError::ObjectStore(e) => is_object_store_error_retryable(e),

            // Re-acquire instead of retrying the same write.
            CoordinationError::ConditionalWriteLost { .. } => false,
            CoordinationError::UnsupportedPartitionType(_) => false,
            CoordinationError::NotLeasable(_) => false,
            CoordinationError::MissingStoreItem { .. } => false,
            CoordinationError::InvalidPartitionKey { .. } => false,
            CoordinationError::Config(_) => false,
            CoordinationError::Serde(_) => false,
        }
    }
}

fn is_io_error_retryable(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
    )
}

fn is_object_store_error_retryable(e: &object_store::Error) -> bool {
    use object_store::Error as ObjErr;

    match e {
        ObjErr::NotFound { .. } => false,
        ObjErr::AlreadyExists { .. } => false,
        ObjErr::Precondition { .. } => false,
        ObjErr::NotSupported { .. } => false,
        ObjErr::NotImplemented => false,
        ObjErr::InvalidPath { .. } => false,
        ObjErr::PermissionDenied { .. } => false,
        ObjErr::Unauthenticated { .. } => false,
        ObjErr::UnknownConfigurationKey { .. } => false,
        ObjErr::NotModified { .. } => true,
        ObjErr::Generic { .. } => true,
        _ => true,
    }
}
