//! Error types for mpt_db

use crate::model::Digest;
use thiserror::Error;

/// Result type alias for mpt_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mpt_db operations
///
/// A key that is simply not present is never an error: mutations report it as
/// `Ok(false)` and lookups as `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A reference placeholder was persisted, or stored bytes do not decode
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// A nibble sequence of odd length cannot be packed back into bytes
    #[error("Malformed path: odd nibble count {0}")]
    MalformedPath(usize),

    /// A hash reference the backing store cannot resolve
    #[error("Missing node: {0}")]
    MissingNode(Digest),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Failure reported by a custom backing store
    #[error("Store error: {0}")]
    Store(String),
}
