//! Error types for merkle tree operations.

use thiserror::Error;

use crate::hash::HashValue;

/// Result type for merkle operations
pub type MerkleResult<T> = Result<T, MerkleError>;

/// Errors that can occur during merkle tree operations.
///
/// A proof that fails to verify is not an error: verification returns `false`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// Proof requested for a leaf beyond the dense tree's size
    #[error("Index out of range: {index} >= {size}")]
    IndexOutOfRange { index: usize, size: usize },

    /// Key or proof length disagrees with the sparse tree's fixed depth
    #[error("Depth mismatch: expected {expected} bits, got {got}")]
    DepthMismatch { expected: usize, got: usize },

    /// Digest length disagrees with the configured digest size
    #[error("Hash length mismatch: expected {expected} bytes, got {got}")]
    HashLengthMismatch { expected: usize, got: usize },

    /// Configured sparse tree depth is outside the supported range
    #[error("Invalid tree depth: {0} (must be 1..=256)")]
    InvalidDepth(usize),

    /// A historical root whose nodes are no longer available
    #[error("Unknown root: {0}")]
    UnknownRoot(HashValue),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
