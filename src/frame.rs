//! Binary layout of a single frame.
//!
//! Every frame written to a partition starts with a fixed 12-byte header,
//! followed immediately by the payload. The whole frame (header + payload)
//! is padded up to the next multiple of [`FRAME_ALIGNMENT`], so that every
//! frame starts on an 8-byte boundary.
//!
//! ```text
//! offset 0  : i32 length    (negative while being written, positive once committed)
//! offset 4  : i8  version
//! offset 5  : i8  flags     (0x80 batch begin, 0x40 batch end, 0x20 failed)
//! offset 6  : i16 type      (0 = MESSAGE, 1 = PADDING)
//! offset 8  : i32 stream id
//! offset 12 : payload ...
//! ```
//!
//! All multi-byte fields are little-endian.
//!
//! Everything in this module is a pure function of its inputs. Callers are
//! expected to bounds-check lengths against the negotiated max frame length
//! before using them here.

/// Byte offset of the `length` field within the header.
pub const LENGTH_OFFSET: usize = 0;
/// Byte offset of the `version` field within the header.
pub const VERSION_OFFSET: usize = 4;
/// Byte offset of the `flags` field within the header.
pub const FLAGS_OFFSET: usize = 5;
/// Byte offset of the `type` field within the header.
pub const TYPE_OFFSET: usize = 6;
/// Byte offset of the `stream id` field within the header.
pub const STREAM_ID_OFFSET: usize = 8;

/// Fixed header length in bytes.
pub const HEADER_LENGTH: usize = 12;

/// Every frame starts (and ends) on a multiple of this.
pub const FRAME_ALIGNMENT: usize = 8;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0;

/// Type tag of a regular message frame.
pub const TYPE_MESSAGE: i16 = 0;
/// Type tag of a padding frame; readers skip its payload.
pub const TYPE_PADDING: i16 = 1;

/// First fragment of a batch.
pub const FLAG_BATCH_BEGIN: u8 = 0x80;
/// Last fragment of a batch.
pub const FLAG_BATCH_END: u8 = 0x40;
/// Frame was failed by a prior subscriber and should be skipped.
pub const FLAG_FAILED: u8 = 0x20;

/// Decoded frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Message,
    Padding,
    /// A type tag this version does not know about.
    Unknown(i16),
}

impl FrameType {
    #[inline]
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            TYPE_MESSAGE => FrameType::Message,
            TYPE_PADDING => FrameType::Padding,
            other => FrameType::Unknown(other),
        }
    }

    #[inline]
    pub fn as_raw(self) -> i16 {
        match self {
            FrameType::Message => TYPE_MESSAGE,
            FrameType::Padding => TYPE_PADDING,
            FrameType::Unknown(raw) => raw,
        }
    }
}

/// Header plus payload, unaligned.
#[inline(always)]
pub const fn framed_length(payload_len: usize) -> usize {
    payload_len + HEADER_LENGTH
}

/// Rounds `len` up to the next multiple of [`FRAME_ALIGNMENT`].
#[inline(always)]
pub const fn aligned_length(len: usize) -> usize {
    (len + (FRAME_ALIGNMENT - 1)) & !(FRAME_ALIGNMENT - 1)
}

/// Number of bytes a frame carrying `payload_len` bytes occupies in a partition.
#[inline(always)]
pub const fn aligned_framed_length(payload_len: usize) -> usize {
    aligned_length(framed_length(payload_len))
}

/// Bytes reserved for a batch of `fragment_count` fragments whose payloads add
/// up to `batch_length`.
///
/// Each fragment carries its own header and may waste up to one alignment unit,
/// and the reservation keeps room for a trailing padding frame. Never less than
/// one empty frame, so even a batch with no fragments closes with valid padding.
#[inline]
pub const fn batch_reservation_length(fragment_count: usize, batch_length: usize) -> usize {
    let length = aligned_length(
        batch_length + fragment_count * (HEADER_LENGTH + FRAME_ALIGNMENT) + FRAME_ALIGNMENT,
    );
    let min = aligned_framed_length(0);
    if length < min { min } else { length }
}

#[inline(always)]
pub const fn length_offset(frame_offset: usize) -> usize {
    frame_offset + LENGTH_OFFSET
}

#[inline(always)]
pub const fn version_offset(frame_offset: usize) -> usize {
    frame_offset + VERSION_OFFSET
}

#[inline(always)]
pub const fn flags_offset(frame_offset: usize) -> usize {
    frame_offset + FLAGS_OFFSET
}

#[inline(always)]
pub const fn type_offset(frame_offset: usize) -> usize {
    frame_offset + TYPE_OFFSET
}

#[inline(always)]
pub const fn stream_id_offset(frame_offset: usize) -> usize {
    frame_offset + STREAM_ID_OFFSET
}

#[inline(always)]
pub const fn payload_offset(frame_offset: usize) -> usize {
    frame_offset + HEADER_LENGTH
}

#[inline(always)]
pub const fn is_batch_begin(flags: u8) -> bool {
    flags & FLAG_BATCH_BEGIN != 0
}

#[inline(always)]
pub const fn is_batch_end(flags: u8) -> bool {
    flags & FLAG_BATCH_END != 0
}

#[inline(always)]
pub const fn is_failed(flags: u8) -> bool {
    flags & FLAG_FAILED != 0
}

#[inline(always)]
pub const fn enable_batch_begin(flags: u8) -> u8 {
    flags | FLAG_BATCH_BEGIN
}

#[inline(always)]
pub const fn enable_batch_end(flags: u8) -> u8 {
    flags | FLAG_BATCH_END
}

#[inline(always)]
pub const fn enable_failed(flags: u8) -> u8 {
    flags | FLAG_FAILED
}

/// Packs a partition id and an offset within that partition into one
/// monotonically increasing log position.
#[inline(always)]
pub const fn position(partition_id: i32, partition_offset: u32) -> i64 {
    ((partition_id as i64) << 32) | partition_offset as i64
}

/// Partition id half of a packed [`position`].
#[inline(always)]
pub const fn partition_id(position: i64) -> i32 {
    (position >> 32) as i32
}

/// Offset half of a packed [`position`].
#[inline(always)]
pub const fn partition_offset(position: i64) -> u32 {
    (position & 0xFFFF_FFFF) as u32
}
