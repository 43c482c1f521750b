//! The log buffer: three partitions cycled by a monotonically increasing id.
//!
//! Exactly one partition is active at a time. When a producer overruns the
//! active partition `N`, it calls [`LogBuffer::on_partition_filled`], which
//! makes `N + 1` active and marks `N + 2` (physically the partition that was
//! filled before `N`) for cleaning. Partition `N` itself is left alone since a
//! lagging reader may still be draining it. A single maintenance context polls
//! [`LogBuffer::clean_partitions`] to zero marked partitions before they come
//! around again.

use crate::appender::{AppendResult, Appender, ClaimedBatch, ClaimedFragment};
use crate::config::LogBufferConfig;
use crate::error::{LogBufferError, Result};
use crate::frame::{self, HEADER_LENGTH};
use crate::layout::{
    LOG_ACTIVE_PARTITION_ID_OFFSET, LOG_INITIAL_PARTITION_ID_OFFSET, LOG_MAX_FRAME_LENGTH_OFFSET,
    LOG_PUBLISHER_LIMIT_OFFSET, PARTITION_COUNT, log_meta_data_offset, partition_index,
    required_capacity,
};
use crate::mmap::MappedRegion;
use crate::partition::{Partition, PartitionStatus, slice_partitions};
use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// Outcome of the producer helpers on [`LogBuffer`].
///
/// Only [`Offer::Accepted`] carries a value. The other variants are
/// back-pressure; the caller decides whether and when to try again.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer<T> {
    Accepted(T),
    /// The active partition has not been cleaned since it was marked.
    AwaitingCleaning,
    /// The active partition is sealed and the rotation past it is not
    /// visible yet.
    AwaitingRotation,
}

impl<T> Offer<T> {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted(_))
    }

    #[inline]
    pub fn accepted(self) -> Option<T> {
        match self {
            Offer::Accepted(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Offer<U> {
        match self {
            Offer::Accepted(value) => Offer::Accepted(f(value)),
            Offer::AwaitingCleaning => Offer::AwaitingCleaning,
            Offer::AwaitingRotation => Offer::AwaitingRotation,
        }
    }
}

/// A lock-free, partitioned, append-only log buffer.
///
/// Producers on any number of threads share a `&LogBuffer` (typically through
/// an `Arc`). Either drive the [`Appender`] directly against
/// [`LogBuffer::active_partition`], or use the checked helpers
/// [`LogBuffer::offer`], [`LogBuffer::claim`] and [`LogBuffer::claim_batch`],
/// which perform the size check and follow rotations.
pub struct LogBuffer {
    // Declared before `region`: partitions point into it.
    partitions: [Partition; PARTITION_COUNT],
    meta: NonNull<u8>,
    partition_size: usize,
    max_frame_length: usize,
    appender: Appender,
    region: MappedRegion,
}

unsafe impl Send for LogBuffer {}
unsafe impl Sync for LogBuffer {}

impl LogBuffer {
    /// Maps the backing memory and lays out the partitions.
    pub fn new(config: LogBufferConfig) -> Result<Self> {
        config.validate()?;

        let partition_size = config.partition_size as usize;
        let max_frame_length = config.effective_max_frame_length();
        let region = MappedRegion::new(required_capacity(partition_size))?;
        let base = region.as_ptr();

        // the mapping is page aligned and holds `required_capacity` bytes
        let partitions = unsafe { slice_partitions(base, partition_size) };
        let meta = unsafe { base.add(log_meta_data_offset(partition_size)) };

        let buffer = Self {
            partitions,
            meta,
            partition_size,
            max_frame_length,
            appender: Appender::new(),
            region,
        };
        buffer
            .meta_i32(LOG_INITIAL_PARTITION_ID_OFFSET)
            .store(config.initial_partition_id, Ordering::Relaxed);
        buffer
            .meta_i32(LOG_MAX_FRAME_LENGTH_OFFSET)
            .store(max_frame_length as i32, Ordering::Relaxed);
        buffer
            .meta_i32(LOG_ACTIVE_PARTITION_ID_OFFSET)
            .store(config.initial_partition_id, Ordering::Release);

        tracing::debug!(
            partition_size,
            initial_partition_id = config.initial_partition_id,
            max_frame_length,
            mapped_bytes = buffer.region.len(),
            "log buffer created"
        );
        Ok(buffer)
    }

    #[inline(always)]
    fn meta_i32(&self, offset: usize) -> &AtomicI32 {
        unsafe { AtomicI32::from_ptr(self.meta.as_ptr().add(offset).cast::<i32>()) }
    }

    #[inline(always)]
    fn meta_i64(&self, offset: usize) -> &AtomicI64 {
        unsafe { AtomicI64::from_ptr(self.meta.as_ptr().add(offset).cast::<i64>()) }
    }

    /// Id of the partition currently accepting writes.
    #[inline]
    pub fn active_partition_id(&self) -> i32 {
        self.meta_i32(LOG_ACTIVE_PARTITION_ID_OFFSET)
            .load(Ordering::Acquire)
    }

    /// Id the buffer started with.
    pub fn initial_partition_id(&self) -> i32 {
        self.meta_i32(LOG_INITIAL_PARTITION_ID_OFFSET)
            .load(Ordering::Relaxed)
    }

    /// Largest payload a frame may carry.
    #[inline]
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    #[inline]
    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    pub const fn partition_count(&self) -> usize {
        PARTITION_COUNT
    }

    /// Partition for `partition_id`, at physical index `partition_id mod 3`.
    #[inline]
    pub fn partition(&self, partition_id: i32) -> &Partition {
        &self.partitions[partition_index(partition_id)]
    }

    /// The active partition together with its id.
    #[inline]
    pub fn active_partition(&self) -> (i32, &Partition) {
        let id = self.active_partition_id();
        (id, self.partition(id))
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Limit position for producers. This layer only stores it.
    pub fn publisher_limit(&self) -> i64 {
        self.meta_i64(LOG_PUBLISHER_LIMIT_OFFSET)
            .load(Ordering::Acquire)
    }

    pub fn set_publisher_limit(&self, limit: i64) {
        self.meta_i64(LOG_PUBLISHER_LIMIT_OFFSET)
            .store(limit, Ordering::Release);
    }

    /// Rotates past `filled_partition_id`.
    ///
    /// Called once per partition, by the producer whose reservation got
    /// [`AppendResult::EndOfPartition`]. Marks the partition two ahead for
    /// cleaning, then release-stores `filled_partition_id + 1` as active.
    ///
    /// Returns `false` and does nothing when `filled_partition_id` is no longer
    /// the active id, so the active id never moves backwards.
    pub fn on_partition_filled(&self, filled_partition_id: i32) -> bool {
        if self.active_partition_id() != filled_partition_id {
            tracing::debug!(
                filled_partition_id,
                active_partition_id = self.active_partition_id(),
                "ignoring fill of inactive partition"
            );
            return false;
        }

        let next_partition_id = filled_partition_id + 1;
        let to_clean = self.partition(filled_partition_id + 2);
        to_clean.set_status_ordered(PartitionStatus::NeedsCleaning);

        self.meta_i32(LOG_ACTIVE_PARTITION_ID_OFFSET)
            .store(next_partition_id, Ordering::Release);

        tracing::debug!(
            filled_partition_id,
            active_partition_id = next_partition_id,
            cleaning_index = to_clean.index(),
            "partition filled"
        );
        true
    }

    /// Cleans every partition marked as needing it.
    ///
    /// Returns how many were cleaned; `0` is the usual answer. Must only be
    /// called from one maintenance context at a time.
    pub fn clean_partitions(&self) -> usize {
        let mut cleaned = 0;
        for partition in &self.partitions {
            if partition.status() == PartitionStatus::NeedsCleaning {
                partition.clean();
                tracing::trace!(index = partition.index(), "partition cleaned");
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            tracing::debug!(cleaned, "cleaned partitions");
        }
        cleaned
    }

    /// Caller-side size check done before any reservation.
    #[inline]
    pub fn check_frame_length(&self, length: usize) -> Result<()> {
        if length == 0 {
            return Err(LogBufferError::EmptyFrame);
        }
        if length > self.max_frame_length {
            return Err(LogBufferError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }
        Ok(())
    }

    /// Appends `payload` to the active partition, rotating as needed.
    ///
    /// On success the frame's log position (see [`frame::position`]) is
    /// returned in [`Offer::Accepted`]. Never blocks: back-pressure is reported
    /// through the other [`Offer`] variants.
    pub fn offer(&self, payload: &[u8], stream_id: i32) -> Result<Offer<i64>> {
        self.check_frame_length(payload.len())?;
        Ok(self.attempt(|partition_id, partition| {
            self.appender
                .append_frame(partition, partition_id, payload, stream_id)
                .map(|frame| frame.position())
        }))
    }

    /// Claims a frame of `length` payload bytes in the active partition,
    /// rotating as needed.
    pub fn claim(&self, length: usize, stream_id: i32) -> Result<Offer<ClaimedFragment<'_>>> {
        self.check_frame_length(length)?;
        Ok(self.attempt(|partition_id, partition| {
            self.appender
                .claim(partition, partition_id, length, stream_id)
        }))
    }

    /// Claims room for a batch of `fragment_count` fragments totalling
    /// `batch_length` payload bytes, rotating as needed.
    pub fn claim_batch(
        &self,
        fragment_count: usize,
        batch_length: usize,
    ) -> Result<Offer<ClaimedBatch<'_>>> {
        if fragment_count == 0 {
            return Err(LogBufferError::EmptyBatch);
        }
        let reserved = frame::batch_reservation_length(fragment_count, batch_length);
        let max = self.partition_size - 2 * HEADER_LENGTH - frame::FRAME_ALIGNMENT;
        if reserved > max {
            return Err(LogBufferError::BatchTooLarge {
                length: reserved,
                max,
            });
        }
        Ok(self.attempt(|partition_id, partition| {
            self.appender
                .claim_batch(partition, partition_id, fragment_count, batch_length)
        }))
    }

    /// Runs `append` against the active partition, following rotations.
    ///
    /// The producer that seals a partition rotates the buffer and moves on to
    /// the next one. Nothing here waits: a partition still marked for cleaning
    /// or a rotation that is not visible yet is returned to the caller, who
    /// owns the retry policy. A partition that is already sealed is not
    /// reserved on again, which keeps its tail from growing while it waits.
    ///
    /// A producer that stalls between reading the active id and reserving can
    /// still land in a partition that was filled, cleaned and reactivated in
    /// the meantime, and would report a stale position. Keeping producers
    /// within the publisher limit rules this out; the case is logged when it
    /// is observed.
    #[inline]
    fn attempt<'a, T>(
        &'a self,
        mut append: impl FnMut(i32, &'a Partition) -> AppendResult<T>,
    ) -> Offer<T> {
        for _ in 0..PARTITION_COUNT {
            let (partition_id, partition) = self.active_partition();
            if partition.status() == PartitionStatus::NeedsCleaning {
                return Offer::AwaitingCleaning;
            }
            if partition.tail_volatile() > partition.size() - HEADER_LENGTH {
                if self.active_partition_id() == partition_id {
                    return Offer::AwaitingRotation;
                }
                continue;
            }
            match append(partition_id, partition) {
                AppendResult::Appended(value) => {
                    let active_partition_id = self.active_partition_id();
                    if active_partition_id > partition_id + 1 {
                        tracing::warn!(
                            partition_id,
                            active_partition_id,
                            "append landed in a partition that may have been recycled"
                        );
                    }
                    return Offer::Accepted(value);
                }
                AppendResult::EndOfPartition => {
                    self.on_partition_filled(partition_id);
                }
                AppendResult::PaddingAtEndOfPartition => {
                    if self.active_partition_id() == partition_id {
                        return Offer::AwaitingRotation;
                    }
                }
            }
        }
        Offer::AwaitingRotation
    }

    /// Unmaps the backing memory.
    ///
    /// Taking `self` guarantees no append or clean is still running. Dropping
    /// the buffer releases the memory too; `close` only surfaces the error.
    pub fn close(mut self) -> Result<()> {
        self.region.release()?;
        tracing::debug!(partition_size = self.partition_size, "log buffer closed");
        Ok(())
    }
}

impl Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffer")
            .field("partition_size", &self.partition_size)
            .field("max_frame_length", &self.max_frame_length)
            .field("active_partition_id", &self.active_partition_id())
            .field("partitions", &self.partitions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameType, is_batch_begin, is_batch_end, partition_id, partition_offset};
    use crate::layout::PARTITION_MIN_SIZE;
    use crate::partition::Frame;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn log_buffer() -> LogBuffer {
        LogBuffer::new(LogBufferConfig::new(PARTITION_MIN_SIZE as u32)).unwrap()
    }

    fn frames(partition: &Partition) -> Vec<Frame<'_>> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + HEADER_LENGTH <= partition.size() {
            match unsafe { partition.read_frame(offset) } {
                Some(frame) => {
                    offset = frame.next_offset();
                    out.push(frame);
                }
                None => break,
            }
        }
        out
    }

    #[test]
    fn new_buffer_starts_at_initial_partition() {
        let buffer = LogBuffer::new(
            LogBufferConfig::new(PARTITION_MIN_SIZE as u32).with_initial_partition_id(7),
        )
        .unwrap();
        assert_eq!(buffer.initial_partition_id(), 7);
        assert_eq!(buffer.active_partition_id(), 7);
        assert_eq!(buffer.active_partition().1.index(), 1);
        assert_eq!(buffer.max_frame_length(), PARTITION_MIN_SIZE / 16);
        assert_eq!(buffer.partition_count(), 3);
        assert_eq!(buffer.partitions().len(), 3);
        assert_eq!(buffer.partition_size(), PARTITION_MIN_SIZE);
        assert_eq!(buffer.publisher_limit(), 0);
        for partition in buffer.partitions() {
            assert_eq!(partition.status(), PartitionStatus::Clean);
            assert_eq!(partition.tail_volatile(), 0);
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            LogBuffer::new(LogBufferConfig::new(1024)),
            Err(LogBufferError::PartitionTooSmall { .. })
        ));
    }

    #[test]
    fn filling_a_partition_marks_the_one_two_ahead() {
        let buffer = log_buffer();
        for filled in 0..6 {
            assert!(buffer.on_partition_filled(filled));
            assert_eq!(buffer.active_partition_id(), filled + 1);

            let dirty: Vec<usize> = buffer
                .partitions()
                .iter()
                .filter(|p| p.status() == PartitionStatus::NeedsCleaning)
                .map(|p| p.index())
                .collect();
            assert_eq!(dirty, vec![((filled + 2) % 3) as usize]);
            assert_ne!(dirty[0], partition_index(filled));
            assert_ne!(dirty[0], partition_index(filled + 1));

            assert_eq!(buffer.clean_partitions(), 1);
            assert_eq!(buffer.clean_partitions(), 0);
        }
    }

    #[test]
    fn cleaning_resets_only_marked_partitions() {
        let buffer = log_buffer();
        let appender = Appender::new();

        let p0 = buffer.partition(0);
        let p1 = buffer.partition(1);
        let _ = appender.append_frame(p0, 0, b"first", 1);
        let _ = appender.append_frame(p1, 1, b"second", 1);

        assert!(buffer.on_partition_filled(0)); // marks partition 2
        assert_eq!(buffer.clean_partitions(), 1);
        assert_eq!(unsafe { p0.read_frame(0) }.unwrap().payload(), b"first");

        assert!(buffer.on_partition_filled(1)); // marks partition 0
        assert_eq!(buffer.clean_partitions(), 1);

        assert_eq!(p0.tail_volatile(), 0);
        assert!(unsafe { p0.read_frame(0) }.is_none());
        assert_eq!(unsafe { p1.read_frame(0) }.unwrap().payload(), b"second");
    }

    #[test]
    fn offer_rotates_when_the_partition_fills() {
        let buffer = log_buffer();
        let payload = vec![0xABu8; buffer.max_frame_length()];

        let mut positions = Vec::new();
        while buffer.active_partition_id() == 0 {
            positions.push(buffer.offer(&payload, 3).unwrap().accepted().unwrap());
        }
        assert_eq!(buffer.active_partition_id(), 1);
        assert_eq!(buffer.partition(2).status(), PartitionStatus::NeedsCleaning);

        let last = *positions.last().unwrap();
        assert_eq!(partition_id(last), 1);
        assert_eq!(partition_offset(last), 0);

        let sealed = frames(buffer.partition(0));
        assert!(sealed.last().unwrap().is_padding());
        assert_eq!(sealed.len(), positions.len()); // every frame but the last, plus padding
        for (frame, position) in sealed.iter().zip(&positions) {
            if !frame.is_padding() {
                assert_eq!(partition_id(*position), 0);
                assert_eq!(partition_offset(*position) as usize, frame.offset());
                assert_eq!(frame.payload(), &payload[..]);
            }
        }
    }

    #[test]
    fn offer_checks_frame_length() {
        let buffer = log_buffer();
        assert!(matches!(buffer.offer(&[], 1), Err(LogBufferError::EmptyFrame)));
        let too_big = vec![0u8; buffer.max_frame_length() + 1];
        assert!(matches!(
            buffer.offer(&too_big, 1),
            Err(LogBufferError::FrameTooLarge { .. })
        ));
        assert!(matches!(
            buffer.claim(buffer.max_frame_length() + 1, 1),
            Err(LogBufferError::FrameTooLarge { .. })
        ));
        assert!(matches!(buffer.claim_batch(0, 10), Err(LogBufferError::EmptyBatch)));
        assert!(matches!(
            buffer.claim_batch(2, PARTITION_MIN_SIZE),
            Err(LogBufferError::BatchTooLarge { .. })
        ));
    }

    #[test]
    fn claim_and_batch_through_the_buffer() {
        let buffer = log_buffer();

        let mut claim = buffer.claim(4, 9).unwrap().accepted().unwrap();
        claim.buffer_mut().copy_from_slice(b"ping");
        let claim_position = claim.position();
        claim.commit();

        let mut batch = buffer.claim_batch(2, 8).unwrap().accepted().unwrap();
        batch.next_fragment(4, 1).unwrap().copy_from_slice(b"abcd");
        batch.next_fragment(4, 2).unwrap().copy_from_slice(b"efgh");
        let batch_position = batch.position();
        batch.commit();

        let p = buffer.partition(0);
        let claimed = unsafe { p.read_frame(partition_offset(claim_position) as usize) }.unwrap();
        assert_eq!(claimed.payload(), b"ping");
        assert_eq!(claimed.stream_id(), 9);

        let first = unsafe { p.read_frame(partition_offset(batch_position) as usize) }.unwrap();
        assert!(is_batch_begin(first.flags()));
        assert_eq!(first.payload(), b"abcd");
        let second = unsafe { p.read_frame(first.next_offset()) }.unwrap();
        assert!(is_batch_end(second.flags()));
        assert_eq!(second.payload(), b"efgh");
        assert_eq!(second.stream_id(), 2);
    }

    #[test]
    fn stale_fill_does_not_move_the_active_id_back() {
        let buffer = log_buffer();
        assert!(buffer.on_partition_filled(0));
        assert!(buffer.on_partition_filled(1));
        assert_eq!(buffer.clean_partitions(), 2);

        assert!(!buffer.on_partition_filled(0));
        assert_eq!(buffer.active_partition_id(), 2);
        assert_eq!(buffer.clean_partitions(), 0);
    }

    #[test]
    fn offer_reports_a_partition_awaiting_cleaning() {
        let buffer = log_buffer();
        let payload = vec![7u8; buffer.max_frame_length()];

        // fills partitions 0 and 1 with nobody cleaning
        let mut accepted = 0;
        let result = loop {
            match buffer.offer(&payload, 1).unwrap() {
                Offer::Accepted(_) => accepted += 1,
                other => break other,
            }
            assert!(accepted < 1_000, "offer never reported back-pressure");
        };
        assert_eq!(result, Offer::AwaitingCleaning);
        assert_eq!(buffer.active_partition_id(), 2);
        assert_eq!(buffer.partition(2).status(), PartitionStatus::NeedsCleaning);
        assert_eq!(buffer.partition(2).tail_volatile(), 0);

        // asking again changes nothing
        assert_eq!(buffer.offer(b"again", 1).unwrap(), Offer::AwaitingCleaning);
        assert!(matches!(buffer.claim(8, 1).unwrap(), Offer::AwaitingCleaning));
        assert!(matches!(buffer.claim_batch(1, 8).unwrap(), Offer::AwaitingCleaning));
        assert_eq!(buffer.partition(2).tail_volatile(), 0);

        assert_eq!(buffer.clean_partitions(), 2);
        let position = buffer.offer(b"after cleaning", 1).unwrap().accepted().unwrap();
        assert_eq!(partition_id(position), 2);
        assert_eq!(partition_offset(position), 0);
        assert_eq!(
            unsafe { buffer.partition(2).read_frame(0) }.unwrap().payload(),
            b"after cleaning"
        );
    }

    #[test]
    fn offer_reports_a_rotation_not_yet_visible() {
        let buffer = log_buffer();
        let p0 = buffer.partition(0);

        // sealed by a producer that has not rotated yet
        assert_eq!(
            Appender::new().append_frame(p0, 0, &vec![0u8; PARTITION_MIN_SIZE], 1),
            AppendResult::EndOfPartition
        );
        let tail = p0.tail_volatile();

        assert_eq!(buffer.offer(b"late", 1).unwrap(), Offer::AwaitingRotation);
        assert!(matches!(buffer.claim(4, 1).unwrap(), Offer::AwaitingRotation));
        assert_eq!(p0.tail_volatile(), tail);
        assert_eq!(buffer.active_partition_id(), 0);

        assert!(buffer.on_partition_filled(0));
        let position = buffer.offer(b"late", 1).unwrap().accepted().unwrap();
        assert_eq!(position, frame::position(1, 0));
    }

    #[test]
    fn claim_and_batch_rotate_when_the_partition_fills() {
        let buffer = log_buffer();
        let max = buffer.max_frame_length();

        let mut last_claim = 0;
        while buffer.active_partition_id() == 0 {
            let mut claim = buffer.claim(max, 1).unwrap().accepted().unwrap();
            claim.buffer_mut().fill(1);
            last_claim = claim.position();
            claim.commit();
        }
        assert_eq!(last_claim, frame::position(1, 0));
        let sealed = frames(buffer.partition(0));
        assert!(sealed.last().unwrap().is_padding());
        assert_eq!(sealed.last().unwrap().next_offset(), PARTITION_MIN_SIZE);
        assert!(sealed[..sealed.len() - 1].iter().all(|f| f.payload().len() == max));

        assert_eq!(buffer.clean_partitions(), 1);

        let mut last_batch = 0;
        while buffer.active_partition_id() == 1 {
            let mut batch = buffer.claim_batch(2, 2 * 1000).unwrap().accepted().unwrap();
            batch.next_fragment(1000, 2).unwrap().fill(2);
            batch.next_fragment(1000, 2).unwrap().fill(3);
            last_batch = batch.position();
            batch.commit();
        }
        assert_eq!(last_batch, frame::position(2, 0));
        assert_eq!(buffer.partition(0).status(), PartitionStatus::NeedsCleaning);

        let sealed = frames(buffer.partition(1));
        assert_eq!(sealed[0].payload().len(), max);
        let padding = sealed.last().unwrap();
        assert!(padding.is_padding());
        assert_eq!(padding.next_offset(), PARTITION_MIN_SIZE);

        let first = unsafe { buffer.partition(2).read_frame(0) }.unwrap();
        assert!(is_batch_begin(first.flags()));
        assert_eq!(first.payload(), &[2u8; 1000][..]);
    }

    #[test]
    fn positions_address_frames_across_rotations() {
        let buffer = log_buffer();
        let payload = vec![5u8; 1000];

        for i in 0..1_000u32 {
            let mut body = payload.clone();
            body[..4].copy_from_slice(&i.to_le_bytes());
            let position = match buffer.offer(&body, 1).unwrap() {
                Offer::Accepted(position) => position,
                Offer::AwaitingCleaning => {
                    assert!(buffer.clean_partitions() > 0);
                    buffer.offer(&body, 1).unwrap().accepted().unwrap()
                }
                Offer::AwaitingRotation => panic!("single producer never waits for rotation"),
            };

            let partition = buffer.partition(partition_id(position));
            let frame = unsafe { partition.read_frame(partition_offset(position) as usize) }.unwrap();
            assert_eq!(frame.payload(), &body[..]);
        }
        assert!(buffer.active_partition_id() >= 10);
    }

    #[test]
    fn frames_of_the_previous_partition_outlive_one_rotation() {
        let buffer = log_buffer();
        let position = buffer.offer(b"hello", 1).unwrap().accepted().unwrap();
        {
            let offset = partition_offset(position) as usize;
            let frame = unsafe { buffer.partition(0).read_frame(offset) }.unwrap();

            // filling 0 marks 2, never 0 itself
            assert!(buffer.on_partition_filled(0));
            assert_eq!(buffer.clean_partitions(), 1);
            assert_eq!(buffer.partition(0).status(), PartitionStatus::Clean);
            assert_eq!(frame.payload(), b"hello");
        }

        // the next fill marks 0, so no frame of it may be held past here
        assert!(buffer.on_partition_filled(1));
        assert_eq!(buffer.partition(0).status(), PartitionStatus::NeedsCleaning);
        assert_eq!(buffer.clean_partitions(), 1);
        assert_eq!(buffer.partition(0).frame_length_volatile(0), 0);
    }

    #[test]
    fn publisher_limit_round_trips() {
        let buffer = log_buffer();
        buffer.set_publisher_limit(frame::position(4, 128));
        assert_eq!(buffer.publisher_limit(), frame::position(4, 128));
    }

    #[test]
    fn close_releases_memory() {
        let buffer = log_buffer();
        assert!(buffer.offer(b"bye", 1).unwrap().is_accepted());
        buffer.close().unwrap();
    }

    #[test]
    fn concurrent_producers_get_unique_ordered_positions() {
        const PRODUCERS: usize = 4;
        const FRAMES: usize = 2_000;

        // 8000 frames of 80 bytes fit in one 4 MiB partition
        let buffer = Arc::new(
            LogBuffer::new(LogBufferConfig::new(4 * 1024 * 1024).with_max_frame_length(256)).unwrap(),
        );

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|t| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    let mut positions = Vec::with_capacity(FRAMES);
                    for i in 0..FRAMES {
                        let mut payload = [0u8; 64];
                        payload[..8].copy_from_slice(&(i as u64).to_le_bytes());
                        positions.push(buffer.offer(&payload, t as i32).unwrap().accepted().unwrap());
                    }
                    positions
                })
            })
            .collect();

        let mut seen: HashSet<i64> = HashSet::new();
        for producer in producers {
            for position in producer.join().unwrap() {
                assert!(seen.insert(position), "duplicate position {}", position);
            }
        }
        assert_eq!(seen.len(), PRODUCERS * FRAMES);
        assert_eq!(buffer.active_partition_id(), 0);

        let written = frames(buffer.partition(0));
        assert_eq!(written.len(), PRODUCERS * FRAMES);
        let mut next = vec![0u64; PRODUCERS];
        for frame in written {
            assert_eq!(frame.frame_type(), FrameType::Message);
            let t = frame.stream_id() as usize;
            let seq = u64::from_le_bytes(frame.payload()[..8].try_into().unwrap());
            // each producer's frames appear in the order it wrote them
            assert_eq!(seq, next[t]);
            next[t] += 1;
        }
    }

    #[test]
    fn reader_never_sees_a_torn_frame() {
        const FRAMES: usize = 5_000;

        let buffer = Arc::new(
            LogBuffer::new(LogBufferConfig::new(4 * 1024 * 1024).with_max_frame_length(256)).unwrap(),
        );

        let reader = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let partition = buffer.partition(0);
                let mut offset = 0;
                let mut count = 0;
                while count < FRAMES {
                    let Some(frame) = (unsafe { partition.read_frame(offset) }) else {
                        std::hint::spin_loop();
                        continue;
                    };
                    let payload = frame.payload();
                    let fill = payload[0];
                    assert_eq!(payload.len(), 1 + fill as usize);
                    assert!(payload.iter().all(|&b| b == fill), "torn frame at {}", offset);
                    assert_eq!(frame.stream_id(), fill as i32);
                    offset = frame.next_offset();
                    count += 1;
                }
                count
            })
        };

        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..FRAMES {
                    let fill = (i % 200) as u8;
                    if i % 2 == 0 {
                        let payload = vec![fill; 1 + fill as usize];
                        assert!(buffer.offer(&payload, fill as i32).unwrap().is_accepted());
                    } else {
                        let mut claim = buffer
                            .claim(1 + fill as usize, fill as i32)
                            .unwrap()
                            .accepted()
                            .unwrap();
                        claim.buffer_mut().fill(fill);
                        claim.commit();
                    }
                }
            })
        };

        writer.join().unwrap();
        assert_eq!(reader.join().unwrap(), FRAMES);
    }
}
