//! Loader error types.
//!
//! Every failure is fatal to the current load. Nothing is retried: byte
//! source reads are harmless to repeat but commits to the target address
//! space are not.

use crate::memory::Permission;
use crate::patch::PatchError;
use crate::segment::SegmentKind;

/// Byte source read failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    #[error("short read at {offset:#x}: wanted {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("read at {offset:#x} is past the end of the source")]
    OutOfBounds { offset: u64 },

    #[error("device error")]
    Device,
}

/// Malformed container.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("container is {len} bytes, header needs 256")]
    Truncated { len: u64 },

    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("{segment} segment is out of destination order")]
    SegmentOrder { segment: SegmentKind },

    #[error("{first} and {second} segments overlap in file")]
    FileOverlap {
        first: SegmentKind,
        second: SegmentKind,
    },

    #[error("{segment} segment overlaps the header")]
    OverlapsHeader { segment: SegmentKind },

    #[error("{segment} segment extends past the end of the file")]
    SegmentOutOfBounds { segment: SegmentKind },

    #[error("{segment} segment is compressed but stores no bytes")]
    EmptyCompressedSegment { segment: SegmentKind },

    #[error("auxiliary extent {index} lies outside the rodata segment")]
    ExtentOutOfBounds { index: usize },
}

/// Segment decompression failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressionError {
    #[error("lz4 stream is invalid")]
    Codec,

    #[error("decompressed past the declared {expected} bytes")]
    Overrun { expected: usize },

    #[error("decompressed to {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("declared size {expected} exceeds what {stored} stored bytes can expand to")]
    SizeExceedsBound { expected: usize, stored: usize },

    #[error("cannot allocate {expected} bytes for the decompressed segment")]
    OutOfMemory { expected: usize },
}

/// Segment content rejected after decoding.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{segment} segment hash mismatch")]
    HashMismatch { segment: SegmentKind },

    #[error("{segment} segment patch failed: {source}")]
    Patch {
        segment: SegmentKind,
        source: PatchError,
    },

    #[error("{segment} segment patch changed size from {expected} to {actual}")]
    PatchSize {
        segment: SegmentKind,
        expected: usize,
        actual: usize,
    },
}

/// Target address space failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("range {address:#x}+{len:#x} ({permission:?}) is unavailable")]
    Unavailable {
        address: u64,
        len: u64,
        permission: Permission,
    },

    #[error("image address computation overflowed")]
    AddressOverflow,
}

/// Any failure of a load call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("{segment} segment decompression failed: {source}")]
    Decompression {
        segment: SegmentKind,
        source: DecompressionError,
    },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("argument data is {len} bytes, capacity is {capacity}")]
    Argument { len: usize, capacity: usize },

    #[error("a primary image has already been loaded")]
    AlreadyLoaded,
}

impl LoadError {
    /// Errors reported to callers as "corrupt image".
    pub fn is_corrupt_image(&self) -> bool {
        matches!(self, Self::Format(_) | Self::Decompression { .. })
    }
}
