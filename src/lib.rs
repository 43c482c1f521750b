//! # Log Buffer
//!
//! A lock-free, partitioned, append-only log buffer for fanning high volumes
//! of small binary frames from many producer threads to any number of
//! independent readers, without locks and without copies on the claim path.
//!
//! The buffer is one anonymous memory mapping sliced into three fixed-size
//! partitions plus their metadata. Producers reserve space with a single
//! atomic `fetch_add` on the active partition's tail counter, then publish
//! each frame by flipping the sign of its length field from negative to
//! positive with a release store. Readers acquire-load that length and only
//! look at the rest of a frame once it is positive.
//!
//! When a reservation runs past the end of the active partition, the partition
//! is sealed with a padding frame and the buffer rotates to the next one. The
//! partition two ahead of the one that filled is marked for cleaning; a single
//! maintenance context zeroes it before it becomes active again.
//!
//! ```text
//!   producers ──fetch_add──▶ [ partition N   ] ◀── active
//!                            [ partition N+1 ]     next
//!                            [ partition N+2 ]     marked for cleaning on rotation
//! ```
//!
//! ## Non-blocking contract
//!
//! Appending never blocks. Running out of room is reported through
//! [`AppendResult::EndOfPartition`] / [`AppendResult::PaddingAtEndOfPartition`],
//! and the caller retries against the new active partition.
//! [`LogBuffer::offer`], [`LogBuffer::claim`] and [`LogBuffer::claim_batch`]
//! follow rotations and do the max-frame-length check, and report
//! back-pressure as [`Offer::AwaitingCleaning`] / [`Offer::AwaitingRotation`]
//! instead of waiting.
//!
//! ## Responsibilities left to the owner
//!
//! - Keep producers from lapping the cleaner and readers (the publisher limit
//!   cell is stored here but not enforced).
//! - Decide what to do about claims that are never committed: readers stall at
//!   them. [`Partition::mark_failed`] sets the FAILED flag for that purpose.
//! - Poll [`LogBuffer::clean_partitions`] from one maintenance context, and
//!   drop every [`Frame`] borrowed from a partition before it gets cleaned.
//! - Decide how producers retry on back-pressure.
//!
//! ## Modules
//!
//! - [`frame`] — frame header layout, alignment and flag helpers.
//! - [`layout`] — offsets of every section of the backing allocation.
//! - [`utils`] — benchmarking helpers.
//!
//! ## License
//!
//! Copyright © 2005–2025
//! IKH Software, Inc.
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

mod appender;
mod config;
mod error;
pub mod frame;
pub mod layout;
mod log_buffer;
mod mmap;
mod partition;
pub mod utils;

pub use appender::{AppendResult, AppendedFrame, Appender, ClaimedBatch, ClaimedFragment};
pub use config::LogBufferConfig;
pub use error::{LogBufferError, Result};
pub use frame::FrameType;
pub use log_buffer::{LogBuffer, Offer};
pub use partition::{Frame, Partition, PartitionStatus};
pub use utils::{Latencies, Summary, mono_time_ns};
