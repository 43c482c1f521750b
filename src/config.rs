//! Log buffer configuration.

use crate::error::{LogBufferError, Result};
use crate::layout::{check_partition_size, default_max_frame_length, max_frame_length_limit};

/// Configuration for creating a [`crate::LogBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogBufferConfig {
    /// Size of each partition's data section in bytes.
    ///
    /// At least 64 KiB and a multiple of the frame alignment.
    pub partition_size: u32,
    /// Id the first active partition gets.
    ///
    /// Lets an owner resume a monotonic id sequence after a restart.
    pub initial_partition_id: i32,
    /// Largest payload a single frame may carry.
    ///
    /// `None` negotiates `partition_size / 16`.
    pub max_frame_length: Option<u32>,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            partition_size: 1024 * 1024, // 1 MiB
            initial_partition_id: 0,
            max_frame_length: None,
        }
    }
}

impl LogBufferConfig {
    /// Configuration with the given partition size and defaults otherwise.
    pub fn new(partition_size: u32) -> Self {
        Self {
            partition_size,
            ..Self::default()
        }
    }

    /// Set the partition size.
    pub fn with_partition_size(mut self, partition_size: u32) -> Self {
        self.partition_size = partition_size;
        self
    }

    /// Set the id of the first active partition.
    pub fn with_initial_partition_id(mut self, initial_partition_id: i32) -> Self {
        self.initial_partition_id = initial_partition_id;
        self
    }

    /// Set the max frame length instead of deriving it from the partition size.
    pub fn with_max_frame_length(mut self, max_frame_length: u32) -> Self {
        self.max_frame_length = Some(max_frame_length);
        self
    }

    /// Max frame length this configuration negotiates.
    pub fn effective_max_frame_length(&self) -> usize {
        self.max_frame_length
            .map(|len| len as usize)
            .unwrap_or_else(|| default_max_frame_length(self.partition_size as usize))
    }

    /// Checks every constraint a log buffer places on its configuration.
    pub fn validate(&self) -> Result<()> {
        let partition_size = self.partition_size as usize;
        check_partition_size(partition_size)?;

        if self.initial_partition_id < 0 {
            return Err(LogBufferError::InvalidInitialPartitionId(
                self.initial_partition_id,
            ));
        }

        let max_frame_length = self.effective_max_frame_length();
        let limit = max_frame_length_limit(partition_size);
        if max_frame_length == 0 || max_frame_length > limit {
            return Err(LogBufferError::InvalidMaxFrameLength {
                length: max_frame_length,
                limit,
            });
        }
        Ok(())
    }
}
