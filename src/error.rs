//! Errors raised by the log buffer.
//!
//! Running out of room in a partition is not an error: the appender reports it
//! through [`crate::AppendResult`] and the caller retries against the next
//! partition. The variants here cover invalid configuration, the caller-side
//! size checks done before a reservation, and batch misuse.

use thiserror::Error;

/// Errors raised by the log buffer.
#[derive(Error, Debug)]
pub enum LogBufferError {
    /// Partition is smaller than the supported minimum.
    #[error("partition size {size} is below the minimum of {min} bytes")]
    PartitionTooSmall { size: usize, min: usize },

    /// Partition is too large for its offsets to fit in an `i32`.
    #[error("partition size {size} exceeds the maximum of {max} bytes")]
    PartitionTooLarge { size: usize, max: usize },

    /// Partition size is not a multiple of the frame alignment.
    #[error("partition size {size} is not a multiple of {alignment}")]
    PartitionMisaligned { size: usize, alignment: usize },

    /// Initial partition id must be non-negative.
    #[error("initial partition id must be non-negative, got {0}")]
    InvalidInitialPartitionId(i32),

    /// Negotiated max frame length is zero or does not fit in a partition.
    #[error("max frame length {length} must be in 1..={limit}")]
    InvalidMaxFrameLength { length: usize, limit: usize },

    /// Zero-length frames cannot be committed.
    #[error("frame payload must not be empty")]
    EmptyFrame,

    /// Frame payload exceeds the negotiated max frame length.
    #[error("frame length {length} exceeds the max frame length of {max}")]
    FrameTooLarge { length: usize, max: usize },

    /// A batch must declare at least one fragment.
    #[error("batch must contain at least one fragment")]
    EmptyBatch,

    /// The batch reservation would not fit in a single partition.
    #[error("batch reservation of {length} bytes exceeds the limit of {max}")]
    BatchTooLarge { length: usize, max: usize },

    /// A fragment does not fit in what is left of the batch reservation.
    #[error("fragment needs {requested} bytes but only {remaining} remain in the batch")]
    BatchOverflow { requested: usize, remaining: usize },

    /// All fragments declared for the batch have already been claimed.
    #[error("all {count} fragments of the batch have been claimed")]
    BatchExhausted { count: usize },

    /// The backing memory could not be mapped.
    #[error("failed to map log buffer memory: {0}")]
    Mmap(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LogBufferError>;
