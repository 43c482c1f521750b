//! One fixed-size slab of the log buffer.
//!
//! A [`Partition`] is a view over two pieces of the backing allocation: its
//! data section, where frames are written back to back, and its metadata
//! block, holding the tail counter and the cleaning status.
//!
//! The only cells touched concurrently are accessed through atomics:
//!
//! - the tail counter (`fetch_add` by producers, reset by cleaning),
//! - the status (set by rotation, cleared by cleaning),
//! - each frame's `length` field (the commit marker) and `flags` byte.
//!
//! All other bytes in the data section are written by exactly one producer,
//! inside a range it reserved through the tail counter, before that frame's
//! length is release-stored as positive. Readers must acquire-load a positive
//! length before looking at anything else in the frame.

use crate::frame::{
    self, FLAG_FAILED, FRAME_ALIGNMENT, FRAME_VERSION, FrameType, HEADER_LENGTH, TYPE_PADDING,
};
use crate::layout::{
    PARTITION_CLEAN, PARTITION_COUNT, PARTITION_NEEDS_CLEANING, PARTITION_STATUS_OFFSET,
    PARTITION_TAIL_COUNTER_OFFSET, partition_data_offset, partition_meta_data_offset,
};
use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicI32, AtomicU8, AtomicU32, Ordering};

/// Lifecycle status of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    Clean,
    NeedsCleaning,
}

impl PartitionStatus {
    #[inline]
    fn from_raw(raw: i32) -> Self {
        if raw == PARTITION_NEEDS_CLEANING {
            PartitionStatus::NeedsCleaning
        } else {
            PartitionStatus::Clean
        }
    }

    #[inline]
    fn as_raw(self) -> i32 {
        match self {
            PartitionStatus::Clean => PARTITION_CLEAN,
            PartitionStatus::NeedsCleaning => PARTITION_NEEDS_CLEANING,
        }
    }
}

/// A partition of the log buffer.
///
/// Holds raw pointers into the mapping owned by [`crate::LogBuffer`]; a
/// partition is only ever handed out by reference from its log buffer, so it
/// cannot outlive the mapping.
pub struct Partition {
    index: usize,
    data: NonNull<u8>,
    size: usize,
    meta: NonNull<u8>,
}

unsafe impl Send for Partition {}
unsafe impl Sync for Partition {}

impl Partition {
    /// # Safety
    ///
    /// `data` must be valid for `size` bytes and `meta` for
    /// [`crate::layout::PARTITION_META_DATA_LENGTH`] bytes for as long as the
    /// partition is used, both 8-byte aligned, and not aliased by any other
    /// partition.
    unsafe fn new(index: usize, data: NonNull<u8>, size: usize, meta: NonNull<u8>) -> Self {
        debug_assert_eq!(data.as_ptr() as usize % FRAME_ALIGNMENT, 0);
        debug_assert_eq!(meta.as_ptr() as usize % FRAME_ALIGNMENT, 0);
        Self {
            index,
            data,
            size,
            meta,
        }
    }

    /// Physical slot of this partition, in `0..PARTITION_COUNT`.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Size of the data section in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    fn tail_counter(&self) -> &AtomicU32 {
        unsafe {
            AtomicU32::from_ptr(
                self.meta
                    .as_ptr()
                    .add(PARTITION_TAIL_COUNTER_OFFSET)
                    .cast::<u32>(),
            )
        }
    }

    #[inline(always)]
    fn status_cell(&self) -> &AtomicI32 {
        unsafe { AtomicI32::from_ptr(self.meta.as_ptr().add(PARTITION_STATUS_OFFSET).cast::<i32>()) }
    }

    /// Atomically reserves `len` bytes and returns the offset they start at.
    ///
    /// The returned offset may lie past the end of the partition; callers
    /// compare `offset + len` against the partition size before writing.
    #[inline(always)]
    pub fn get_and_add_tail(&self, len: usize) -> usize {
        debug_assert!(len <= u32::MAX as usize);
        self.tail_counter().fetch_add(len as u32, Ordering::AcqRel) as usize
    }

    /// Current tail (next free offset). May exceed [`Partition::size`] once
    /// the partition has been overrun.
    #[inline]
    pub fn tail_volatile(&self) -> usize {
        self.tail_counter().load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn status(&self) -> PartitionStatus {
        PartitionStatus::from_raw(self.status_cell().load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_status_ordered(&self, status: PartitionStatus) {
        self.status_cell().store(status.as_raw(), Ordering::Release);
    }

    /// Zeroes the data section, resets the tail and marks the partition clean.
    ///
    /// Must only run on a partition no producer or reader is using, from the
    /// single maintenance context.
    pub(crate) fn clean(&self) {
        unsafe { std::ptr::write_bytes(self.data.as_ptr(), 0, self.size) };
        self.tail_counter().store(0, Ordering::Release);
        self.set_status_ordered(PartitionStatus::Clean);
    }

    #[inline(always)]
    fn check_header(&self, frame_offset: usize) {
        assert!(
            frame_offset % FRAME_ALIGNMENT == 0 && frame_offset + HEADER_LENGTH <= self.size,
            "frame offset {} out of bounds for partition of {} bytes",
            frame_offset,
            self.size
        );
    }

    #[inline(always)]
    fn length_cell(&self, frame_offset: usize) -> &AtomicI32 {
        unsafe {
            AtomicI32::from_ptr(
                self.data
                    .as_ptr()
                    .add(frame::length_offset(frame_offset))
                    .cast::<i32>(),
            )
        }
    }

    #[inline(always)]
    fn flags_cell(&self, frame_offset: usize) -> &AtomicU8 {
        unsafe { AtomicU8::from_ptr(self.data.as_ptr().add(frame::flags_offset(frame_offset))) }
    }

    /// Acquire-loads the length field of the frame at `frame_offset`.
    ///
    /// Negative means reserved but not yet committed, zero means nothing was
    /// written there yet. Only a positive value makes the rest of the frame
    /// visible.
    ///
    /// # Panics
    ///
    /// Panics if `frame_offset` is misaligned or leaves no room for a header.
    #[inline]
    pub fn frame_length_volatile(&self, frame_offset: usize) -> i32 {
        self.check_header(frame_offset);
        i32::from_le(self.length_cell(frame_offset).load(Ordering::Acquire))
    }

    /// Reads the committed frame at `frame_offset`.
    ///
    /// Returns `None` while the frame is not committed (length `<= 0`), and
    /// for lengths that would run past the partition end.
    ///
    /// # Safety
    ///
    /// The returned [`Frame`] borrows the payload in place. The partition must
    /// not be cleaned (see [`crate::LogBuffer::clean_partitions`]) while the
    /// frame is alive. A reader that stays within the active partition and
    /// the one before it, and holds no frame across a rotation that marks its
    /// partition, satisfies this.
    ///
    /// # Panics
    ///
    /// Panics if `frame_offset` is misaligned or leaves no room for a header.
    pub unsafe fn read_frame(&self, frame_offset: usize) -> Option<Frame<'_>> {
        let length = self.frame_length_volatile(frame_offset);
        if length <= 0 {
            return None;
        }
        let length = length as usize;
        if frame::payload_offset(frame_offset) + length > self.size {
            return None;
        }

        let base = self.data.as_ptr();
        unsafe {
            let version = base.add(frame::version_offset(frame_offset)).read();
            let flags = self.flags_cell(frame_offset).load(Ordering::Acquire);
            let raw_type = i16::from_le_bytes(
                base.add(frame::type_offset(frame_offset))
                    .cast::<[u8; 2]>()
                    .read(),
            );
            let stream_id = i32::from_le_bytes(
                base.add(frame::stream_id_offset(frame_offset))
                    .cast::<[u8; 4]>()
                    .read(),
            );
            let payload =
                std::slice::from_raw_parts(base.add(frame::payload_offset(frame_offset)), length);
            Some(Frame {
                offset: frame_offset,
                version,
                flags,
                frame_type: FrameType::from_raw(raw_type),
                stream_id,
                payload,
            })
        }
    }

    /// Sets the FAILED flag on the frame at `frame_offset`.
    ///
    /// This never commits the frame; deciding when a stuck frame is failed and
    /// skipped is up to whoever owns the readers.
    pub fn mark_failed(&self, frame_offset: usize) {
        self.check_header(frame_offset);
        self.flags_cell(frame_offset)
            .fetch_or(FLAG_FAILED, Ordering::AcqRel);
    }

    // Writers below operate inside a range the caller reserved through
    // `get_and_add_tail`; that reservation is what makes the plain writes
    // exclusive.

    /// Stores `length` with release ordering; a positive value commits.
    #[inline(always)]
    pub(crate) fn put_length_ordered(&self, frame_offset: usize, length: i32) {
        self.length_cell(frame_offset)
            .store(length.to_le(), Ordering::Release);
    }

    /// Marks the frame as in progress: negative length, then a store fence.
    #[inline(always)]
    pub(crate) fn put_length_in_progress(&self, frame_offset: usize, payload_len: usize) {
        self.length_cell(frame_offset)
            .store((-(payload_len as i32)).to_le(), Ordering::Relaxed);
        atomic::fence(Ordering::Release);
    }

    /// Writes version, flags, type and stream id.
    #[inline(always)]
    pub(crate) fn put_header_fields(&self, frame_offset: usize, flags: u8, frame_type: i16, stream_id: i32) {
        let base = self.data.as_ptr();
        unsafe {
            base.add(frame::version_offset(frame_offset)).write(FRAME_VERSION);
            base.add(frame::type_offset(frame_offset))
                .cast::<[u8; 2]>()
                .write(frame_type.to_le_bytes());
            base.add(frame::stream_id_offset(frame_offset))
                .cast::<[u8; 4]>()
                .write(stream_id.to_le_bytes());
        }
        self.flags_cell(frame_offset).store(flags, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn put_type(&self, frame_offset: usize, frame_type: i16) {
        unsafe {
            self.data
                .as_ptr()
                .add(frame::type_offset(frame_offset))
                .cast::<[u8; 2]>()
                .write(frame_type.to_le_bytes());
        }
    }

    #[inline(always)]
    pub(crate) fn update_flags(&self, frame_offset: usize, flags: u8) {
        self.flags_cell(frame_offset).fetch_or(flags, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn put_bytes(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.as_ptr().add(offset), bytes.len());
        }
    }

    /// Mutable view over `len` bytes starting at `offset`.
    ///
    /// # Safety
    ///
    /// The range must lie inside a reservation owned by the caller, and no
    /// other reference to it may exist while the slice is alive.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.size);
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr().add(offset), len) }
    }

    /// Writes a committed padding frame covering `pad_length` bytes at
    /// `frame_offset` (header included).
    ///
    /// Does nothing when `pad_length` cannot hold a header.
    pub(crate) fn put_padding(&self, frame_offset: usize, pad_length: usize) {
        if pad_length < HEADER_LENGTH {
            return;
        }
        let padding_payload = pad_length - HEADER_LENGTH;
        self.put_length_in_progress(frame_offset, padding_payload);
        self.put_header_fields(frame_offset, 0, TYPE_PADDING, 0);
        self.put_length_ordered(frame_offset, padding_payload as i32);
    }
}

impl Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("index", &self.index)
            .field("size", &self.size)
            .field("tail", &self.tail_volatile())
            .field("status", &self.status())
            .finish()
    }
}

/// A committed frame, borrowed from its partition.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    offset: usize,
    version: u8,
    flags: u8,
    frame_type: FrameType,
    stream_id: i32,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Offset of the frame header within its partition.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    #[inline]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    #[inline]
    pub fn is_padding(&self) -> bool {
        self.frame_type == FrameType::Padding
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        frame::is_failed(self.flags)
    }

    /// Offset of the frame that follows this one.
    #[inline]
    pub fn next_offset(&self) -> usize {
        self.offset + frame::aligned_framed_length(self.payload.len())
    }
}

/// Slices one allocation into [`PARTITION_COUNT`] partitions, following the
/// offsets in [`crate::layout`].
///
/// # Safety
///
/// `base` must point to at least
/// [`crate::layout::required_capacity`]`(partition_size)` bytes that stay
/// valid for as long as the returned partitions are used, and must be
/// 8-byte aligned.
pub(crate) unsafe fn slice_partitions(base: NonNull<u8>, partition_size: usize) -> [Partition; PARTITION_COUNT] {
    std::array::from_fn(|index| unsafe {
        let data = base.add(partition_data_offset(partition_size, index));
        let meta = base.add(partition_meta_data_offset(partition_size, index));
        Partition::new(index, data, partition_size, meta)
    })
}
