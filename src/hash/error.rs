//! Hash index errors.

use crate::storage::BufferPoolError;

/// Errors that can occur during hash index operations.
#[derive(Debug)]
pub enum HashTableError {
    /// Underlying buffer pool failure (exhaustion or I/O).
    Buffer(BufferPoolError),

    /// The construction parameters do not fit the fixed page layouts.
    InvalidConfig(String),
}

impl std::fmt::Display for HashTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashTableError::Buffer(e) => write!(f, "buffer pool error: {}", e),
            HashTableError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for HashTableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HashTableError::Buffer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BufferPoolError> for HashTableError {
    fn from(e: BufferPoolError) -> Self {
        HashTableError::Buffer(e)
    }
}
