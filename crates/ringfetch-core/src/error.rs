//! Error types for ring buffer operations.

use thiserror::Error;

/// Result type alias for ring buffer operations.
pub type Result<T> = core::result::Result<T, BufferError>;

/// Ring buffer error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// A single write is larger than the whole ring.
    #[error("write of {len} bytes exceeds buffer size {capacity}")]
    ExceedsCapacity { len: usize, capacity: usize },

    /// The ring does not currently have room for the write.
    #[error("not enough space: need {len} bytes, {free} free")]
    InsufficientSpace { len: usize, free: usize },

    /// Nothing is buffered.
    #[error("buffer is empty")]
    Empty,

    /// The requested absolute position is outside the readable window.
    #[error("position {position} is not resident")]
    NotResident { position: u64 },

    /// The ring has been closed and its storage released.
    #[error("buffer is closed")]
    Closed,
}

impl BufferError {
    /// Capacity errors point at a tier/size mismatch rather than a transient condition.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            BufferError::ExceedsCapacity { .. } | BufferError::InsufficientSpace { .. }
        )
    }
}
