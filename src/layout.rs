//! Memory layout of the backing allocation.
//!
//! One allocation holds the data sections of all partitions, followed by one
//! metadata block per partition, followed by the global metadata block:
//!
//! ```text
//! ┌──────────────────────────────┐ 0
//! │ partition 0 data             │
//! ├──────────────────────────────┤ partition_size
//! │ partition 1 data             │
//! ├──────────────────────────────┤ 2 * partition_size
//! │ partition 2 data             │
//! ├──────────────────────────────┤ 3 * partition_size
//! │ partition 0..2 metadata      │ 3 * PARTITION_META_DATA_LENGTH
//! ├──────────────────────────────┤
//! │ global metadata              │ LOG_META_DATA_LENGTH
//! └──────────────────────────────┘
//! ```
//!
//! Every cell that is written concurrently sits two cache lines away from its
//! neighbours, so producers bumping a tail never share a line (or the adjacent
//! line the hardware prefetcher pulls in) with the maintenance thread.

use crate::error::{LogBufferError, Result};
use crate::frame::{FRAME_ALIGNMENT, HEADER_LENGTH};

pub const CACHE_LINE_LENGTH: usize = 64;

/// Number of partitions in a log buffer. Not configurable.
pub const PARTITION_COUNT: usize = 3;

/// Smallest accepted partition size (64 KiB).
pub const PARTITION_MIN_SIZE: usize = 64 * 1024;

/// Partition status: ready to be written.
pub const PARTITION_CLEAN: i32 = 0;
/// Partition status: must be zeroed before it becomes active again.
pub const PARTITION_NEEDS_CLEANING: i32 = 1;

// partition metadata block
pub const PARTITION_TAIL_COUNTER_OFFSET: usize = 0;
pub const PARTITION_STATUS_OFFSET: usize = PARTITION_TAIL_COUNTER_OFFSET + CACHE_LINE_LENGTH * 2;
pub const PARTITION_META_DATA_LENGTH: usize = PARTITION_STATUS_OFFSET + CACHE_LINE_LENGTH * 2;

// global metadata block
pub const LOG_PUBLISHER_LIMIT_OFFSET: usize = 0;
pub const LOG_ACTIVE_PARTITION_ID_OFFSET: usize = LOG_PUBLISHER_LIMIT_OFFSET + CACHE_LINE_LENGTH * 2;
pub const LOG_MAX_FRAME_LENGTH_OFFSET: usize = LOG_ACTIVE_PARTITION_ID_OFFSET + CACHE_LINE_LENGTH * 2;
pub const LOG_INITIAL_PARTITION_ID_OFFSET: usize = LOG_MAX_FRAME_LENGTH_OFFSET + CACHE_LINE_LENGTH * 2;
pub const LOG_META_DATA_LENGTH: usize = LOG_INITIAL_PARTITION_ID_OFFSET + CACHE_LINE_LENGTH * 2;

/// Largest partition size for which every offset in the allocation still fits
/// in a positive `i32`, rounded down to the frame alignment.
pub const PARTITION_MAX_SIZE: usize = ((i32::MAX as usize
    - PARTITION_COUNT * PARTITION_META_DATA_LENGTH
    - LOG_META_DATA_LENGTH)
    / PARTITION_COUNT)
    & !(FRAME_ALIGNMENT - 1);

/// Total number of bytes the backing allocation must hold.
#[inline]
pub const fn required_capacity(partition_size: usize) -> usize {
    PARTITION_COUNT * (partition_size + PARTITION_META_DATA_LENGTH) + LOG_META_DATA_LENGTH
}

/// Offset of the data section of partition `index`.
#[inline]
pub const fn partition_data_offset(partition_size: usize, index: usize) -> usize {
    index * partition_size
}

/// Offset of the metadata block of partition `index`.
#[inline]
pub const fn partition_meta_data_offset(partition_size: usize, index: usize) -> usize {
    PARTITION_COUNT * partition_size + index * PARTITION_META_DATA_LENGTH
}

/// Offset of the global metadata block.
#[inline]
pub const fn log_meta_data_offset(partition_size: usize) -> usize {
    PARTITION_COUNT * (partition_size + PARTITION_META_DATA_LENGTH)
}

/// Physical slot of a (monotonically increasing) partition id.
#[inline(always)]
pub const fn partition_index(partition_id: i32) -> usize {
    partition_id.rem_euclid(PARTITION_COUNT as i32) as usize
}

/// Checks that `partition_size` can back a log buffer.
pub fn check_partition_size(partition_size: usize) -> Result<()> {
    if partition_size < PARTITION_MIN_SIZE {
        return Err(LogBufferError::PartitionTooSmall {
            size: partition_size,
            min: PARTITION_MIN_SIZE,
        });
    }
    if partition_size > PARTITION_MAX_SIZE {
        return Err(LogBufferError::PartitionTooLarge {
            size: partition_size,
            max: PARTITION_MAX_SIZE,
        });
    }
    if partition_size % FRAME_ALIGNMENT != 0 {
        return Err(LogBufferError::PartitionMisaligned {
            size: partition_size,
            alignment: FRAME_ALIGNMENT,
        });
    }
    Ok(())
}

/// Largest payload a single frame may carry in a partition of this size.
///
/// Leaves room for the frame's own header plus a trailing header, and for the
/// worst-case alignment waste.
#[inline]
pub const fn max_frame_length_limit(partition_size: usize) -> usize {
    partition_size - 2 * HEADER_LENGTH - FRAME_ALIGNMENT
}

/// Max frame length negotiated when none is configured.
#[inline]
pub const fn default_max_frame_length(partition_size: usize) -> usize {
    partition_size / 16
}
