//! Error types shared by the record store, the protocol handlers and the
//! gate registry.

use thiserror::Error;

use crate::remote_state::LockEntry;

/// Domain errors surfaced by every cluster operation.
///
/// The two lock variants carry the lock currently held for the name so the
/// REST layer can echo it back to the client.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A keyed lookup missed.
    #[error("{0} not found")]
    NotFound(String),

    /// Unique-key violation on create.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Lock acquisition on a name that is already locked.
    #[error("{} is already locked by {}", .0.name, .0.lock_id)]
    AlreadyLocked(LockEntry),

    /// Lock token supplied by the caller does not match the holder.
    #[error("lock on {} is held by {}", .0.name, .0.lock_id)]
    LockConflict(LockEntry),

    /// Malformed request input (path segment, body).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Store, transport or serialization failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Shorthand for `NotFound` with a `kind "key"` description.
    pub fn not_found(kind: &str, key: &str) -> Self {
        ClusterError::NotFound(format!("{} {:?}", kind, key))
    }

    /// Shorthand for `AlreadyExists` with a `kind "key"` description.
    pub fn already_exists(kind: &str, key: &str) -> Self {
        ClusterError::AlreadyExists(format!("{} {:?}", kind, key))
    }

    /// True for the `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

impl From<crate::storage::StorageError> for ClusterError {
    fn from(e: crate::storage::StorageError) -> Self {
        ClusterError::Internal(e.to_string())
    }
}

impl From<bincode::Error> for ClusterError {
    fn from(e: bincode::Error) -> Self {
        ClusterError::Internal(format!("serialization error: {}", e))
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
