//! Frame write and claim protocols.
//!
//! The [`Appender`] holds no state. Each operation reserves space in a
//! partition with a single `fetch_add` on its tail counter, which hands every
//! producer a disjoint byte range, and then publishes the frame through the
//! sign of its length field:
//!
//! 1. store `-payload_len`, then a store fence,
//! 2. write version, flags, type, stream id and payload,
//! 3. release-store `+payload_len`.
//!
//! A reader that acquire-loads a positive length therefore sees the whole
//! frame; a negative length means "reserved, not yet written" and the reader
//! must not move past it.
//!
//! # Partition overrun
//!
//! When a reservation ends past `partition_size - HEADER_LENGTH`, nothing is
//! written for it. The first producer to overrun a partition still has at least
//! a header's worth of room at its offset; it fills the rest of the partition
//! with a committed padding frame and gets [`AppendResult::EndOfPartition`]. It
//! is then expected to rotate the log buffer
//! ([`crate::LogBuffer::on_partition_filled`]). Every later producer lands
//! past that padding and gets [`AppendResult::PaddingAtEndOfPartition`]. Both
//! mean "retry against the active partition"; the partition is sealed.
//!
//! # Abandoned claims
//!
//! A claim that is neither committed nor aborted leaves a negative length in
//! the partition forever, and every reader stalls at it. This layer does not
//! detect or repair that; [`crate::Partition::mark_failed`] is the hook for
//! whoever owns the readers to flag such a frame.

use crate::error::{LogBufferError, Result};
use crate::frame::{
    self, FLAG_BATCH_BEGIN, FLAG_BATCH_END, HEADER_LENGTH, TYPE_MESSAGE, TYPE_PADDING,
    aligned_framed_length, batch_reservation_length,
};
use crate::partition::Partition;

/// Outcome of a reservation.
///
/// Only `Appended` carries a result. The two other variants are routine
/// back-pressure: re-read the active partition id and try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum AppendResult<T> {
    Appended(T),
    /// This reservation overran the partition and sealed it with padding.
    EndOfPartition,
    /// The partition was already sealed by an earlier reservation.
    PaddingAtEndOfPartition,
}

impl<T> AppendResult<T> {
    #[inline]
    pub fn is_appended(&self) -> bool {
        matches!(self, AppendResult::Appended(_))
    }

    #[inline]
    pub fn appended(self) -> Option<T> {
        match self {
            AppendResult::Appended(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AppendResult<U> {
        match self {
            AppendResult::Appended(value) => AppendResult::Appended(f(value)),
            AppendResult::EndOfPartition => AppendResult::EndOfPartition,
            AppendResult::PaddingAtEndOfPartition => AppendResult::PaddingAtEndOfPartition,
        }
    }
}

/// Where a frame was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedFrame {
    /// Active partition id the frame was written under.
    pub partition_id: i32,
    /// Offset of the frame header within the partition.
    pub offset: usize,
    /// Partition tail right after this frame.
    pub new_tail: usize,
}

impl AppendedFrame {
    /// Log position of the frame, see [`frame::position`].
    #[inline]
    pub fn position(&self) -> i64 {
        frame::position(self.partition_id, self.offset as u32)
    }
}

/// Stateless implementation of the append, claim and batch-claim protocols.
#[derive(Debug, Default, Clone, Copy)]
pub struct Appender;

impl Appender {
    pub fn new() -> Self {
        Self
    }

    /// Copies `payload` into a new frame on `partition`.
    ///
    /// `payload` must not be longer than the negotiated max frame length;
    /// callers check this before appending.
    #[inline]
    pub fn append_frame(
        &self,
        partition: &Partition,
        active_partition_id: i32,
        payload: &[u8],
        stream_id: i32,
    ) -> AppendResult<AppendedFrame> {
        let frame_length = aligned_framed_length(payload.len());
        let frame_offset = partition.get_and_add_tail(frame_length);
        let new_tail = frame_offset + frame_length;

        if new_tail <= partition.size() - HEADER_LENGTH {
            partition.put_length_in_progress(frame_offset, payload.len());
            partition.put_header_fields(frame_offset, 0, TYPE_MESSAGE, stream_id);
            partition.put_bytes(frame::payload_offset(frame_offset), payload);
            partition.put_length_ordered(frame_offset, payload.len() as i32);

            AppendResult::Appended(AppendedFrame {
                partition_id: active_partition_id,
                offset: frame_offset,
                new_tail,
            })
        } else {
            on_end_of_partition(partition, frame_offset)
        }
    }

    /// Reserves a frame of `length` payload bytes and returns a handle to write
    /// it in place.
    ///
    /// The header is written with a negative length; the frame stays invisible
    /// until [`ClaimedFragment::commit`] or [`ClaimedFragment::abort`].
    #[inline]
    pub fn claim<'a>(
        &self,
        partition: &'a Partition,
        active_partition_id: i32,
        length: usize,
        stream_id: i32,
    ) -> AppendResult<ClaimedFragment<'a>> {
        let frame_length = aligned_framed_length(length);
        let frame_offset = partition.get_and_add_tail(frame_length);
        let new_tail = frame_offset + frame_length;

        if new_tail <= partition.size() - HEADER_LENGTH {
            partition.put_length_in_progress(frame_offset, length);
            partition.put_header_fields(frame_offset, 0, TYPE_MESSAGE, stream_id);

            AppendResult::Appended(ClaimedFragment {
                partition,
                partition_id: active_partition_id,
                offset: frame_offset,
                length,
                new_tail,
            })
        } else {
            on_end_of_partition(partition, frame_offset)
        }
    }

    /// Reserves room for `fragment_count` fragments whose payloads add up to
    /// `batch_length` bytes.
    ///
    /// The reservation is over-provisioned (see
    /// [`frame::batch_reservation_length`]) so every fragment can start on an
    /// aligned offset with its own header, and the unused rest can be closed
    /// with a padding frame. A batch of zero fragments still reserves one
    /// empty frame and publishes as padding.
    pub fn claim_batch<'a>(
        &self,
        partition: &'a Partition,
        active_partition_id: i32,
        fragment_count: usize,
        batch_length: usize,
    ) -> AppendResult<ClaimedBatch<'a>> {
        let reserved = batch_reservation_length(fragment_count, batch_length);
        let batch_offset = partition.get_and_add_tail(reserved);
        let new_tail = batch_offset + reserved;

        if new_tail <= partition.size() - HEADER_LENGTH {
            AppendResult::Appended(ClaimedBatch {
                partition,
                partition_id: active_partition_id,
                offset: batch_offset,
                reserved,
                fragment_count,
                claimed: 0,
                next_offset: batch_offset,
                last_fragment_offset: batch_offset,
            })
        } else {
            on_end_of_partition(partition, batch_offset)
        }
    }
}

#[inline(never)]
fn on_end_of_partition<T>(partition: &Partition, frame_offset: usize) -> AppendResult<T> {
    let size = partition.size();
    if frame_offset + HEADER_LENGTH <= size {
        partition.put_padding(frame_offset, size - frame_offset);
        AppendResult::EndOfPartition
    } else {
        AppendResult::PaddingAtEndOfPartition
    }
}

/// A reserved, not yet committed frame.
///
/// Write the payload through [`ClaimedFragment::buffer_mut`], then call
/// [`ClaimedFragment::commit`]. Dropping the handle without committing or
/// aborting leaves the frame in progress and stalls every reader at it.
#[derive(Debug)]
#[must_use = "a claimed fragment must be committed or aborted"]
pub struct ClaimedFragment<'a> {
    partition: &'a Partition,
    partition_id: i32,
    offset: usize,
    length: usize,
    new_tail: usize,
}

impl<'a> ClaimedFragment<'a> {
    /// Offset of the frame header within the partition.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    #[inline]
    pub fn position(&self) -> i64 {
        frame::position(self.partition_id, self.offset as u32)
    }

    /// Partition tail right after this frame.
    #[inline]
    pub fn new_tail(&self) -> usize {
        self.new_tail
    }

    /// Payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The claimed payload bytes, `[offset + HEADER_LENGTH, offset + framed_length)`.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        unsafe {
            self.partition
                .bytes_mut(frame::payload_offset(self.offset), self.length)
        }
    }

    /// Publishes the frame to readers.
    #[inline]
    pub fn commit(self) {
        self.partition
            .put_length_ordered(self.offset, self.length as i32);
    }

    /// Turns the claimed slot into padding so readers skip it.
    pub fn abort(self) {
        self.partition.put_type(self.offset, TYPE_PADDING);
        self.partition
            .put_length_ordered(self.offset, self.length as i32);
    }
}

/// A reservation holding several independently framed fragments.
///
/// Fragments are laid out back to back on aligned offsets with
/// [`ClaimedBatch::next_fragment`]. [`ClaimedBatch::commit`] publishes them all
/// at once: the first fragment is committed last, so a reader that sees it
/// also sees every other fragment of the batch.
#[derive(Debug)]
#[must_use = "a claimed batch must be committed or aborted"]
pub struct ClaimedBatch<'a> {
    partition: &'a Partition,
    partition_id: i32,
    offset: usize,
    reserved: usize,
    fragment_count: usize,
    claimed: usize,
    next_offset: usize,
    last_fragment_offset: usize,
}

impl<'a> ClaimedBatch<'a> {
    /// Offset of the first fragment within the partition.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    #[inline]
    pub fn position(&self) -> i64 {
        frame::position(self.partition_id, self.offset as u32)
    }

    /// Total bytes reserved for the batch.
    #[inline]
    pub fn reserved_len(&self) -> usize {
        self.reserved
    }

    /// Partition tail right after the reservation.
    #[inline]
    pub fn new_tail(&self) -> usize {
        self.offset + self.reserved
    }

    /// Number of fragments claimed so far.
    #[inline]
    pub fn fragments(&self) -> usize {
        self.claimed
    }

    /// Lays out the next fragment and returns its payload bytes to fill in.
    ///
    /// The fragment header is written with a negative length; the first
    /// fragment carries the batch-begin flag.
    pub fn next_fragment(&mut self, length: usize, stream_id: i32) -> Result<&mut [u8]> {
        if self.claimed == self.fragment_count {
            return Err(LogBufferError::BatchExhausted {
                count: self.fragment_count,
            });
        }
        if length == 0 {
            return Err(LogBufferError::EmptyFrame);
        }

        // the rest of the reservation must stay big enough for a padding header
        let remaining = self.offset + self.reserved - self.next_offset - HEADER_LENGTH;
        let frame_length = aligned_framed_length(length);
        if frame_length > remaining {
            return Err(LogBufferError::BatchOverflow {
                requested: frame_length,
                remaining,
            });
        }

        let fragment_offset = self.next_offset;
        let flags = if self.claimed == 0 { FLAG_BATCH_BEGIN } else { 0 };
        self.partition
            .put_length_in_progress(fragment_offset, length);
        self.partition
            .put_header_fields(fragment_offset, flags, TYPE_MESSAGE, stream_id);

        self.claimed += 1;
        self.last_fragment_offset = fragment_offset;
        self.next_offset = fragment_offset + frame_length;

        Ok(unsafe {
            self.partition
                .bytes_mut(frame::payload_offset(fragment_offset), length)
        })
    }

    /// Publishes all fragments.
    pub fn commit(self) {
        if self.claimed == 0 {
            self.partition.put_padding(self.offset, self.reserved);
            return;
        }
        self.partition
            .update_flags(self.last_fragment_offset, FLAG_BATCH_END);
        self.publish(TYPE_MESSAGE);
    }

    /// Turns every fragment into padding and publishes them, so readers skip
    /// the whole reservation.
    pub fn abort(self) {
        if self.claimed == 0 {
            self.partition.put_padding(self.offset, self.reserved);
            return;
        }
        self.publish(TYPE_PADDING);
    }

    fn publish(&self, frame_type: i16) {
        let partition = self.partition;
        let end = self.offset + self.reserved;
        partition.put_padding(self.next_offset, end - self.next_offset);

        let first_length = fragment_length(partition, self.offset);
        let mut fragment_offset = self.offset + aligned_framed_length(first_length);
        for _ in 1..self.claimed {
            let length = fragment_length(partition, fragment_offset);
            if frame_type == TYPE_PADDING {
                partition.put_type(fragment_offset, TYPE_PADDING);
            }
            partition.put_length_ordered(fragment_offset, length as i32);
            fragment_offset += aligned_framed_length(length);
        }
        debug_assert_eq!(fragment_offset, self.next_offset);

        if frame_type == TYPE_PADDING {
            partition.put_type(self.offset, TYPE_PADDING);
        }
        partition.put_length_ordered(self.offset, first_length as i32);
    }
}

/// Payload length of an in-progress fragment, read back from its header.
#[inline]
fn fragment_length(partition: &Partition, fragment_offset: usize) -> usize {
    partition.frame_length_volatile(fragment_offset).unsigned_abs() as usize
}
