//! Container header codec.
//!
//! The header is a fixed 256-byte little-endian record at the start of the
//! file:
//!
//! ```text
//!   0x00  magic "NSO0"            0x40  build id (32 bytes)
//!   0x04  version                 0x60  compressed sizes [3]
//!   0x08  reserved                0x6C  padding
//!   0x0C  flags                   0x88  rodata extents [3] (offset, size)
//!   0x10  segment headers [3]     0xA0  segment hashes [3] (SHA-256)
//! ```
//!
//! Each segment header is (file offset, memory offset, size, extra). The
//! meaning of `extra` depends on the segment: an alignment hint for text and
//! rodata, the bss size for data. It is decoded into [`SegmentExtra`] by
//! segment index and never reinterpreted afterwards.

use bitflags::bitflags;

use crate::config::{
    BUILD_ID_SIZE, HASH_SIZE, HEADER_SIZE, IMAGE_MAGIC, SEGMENT_COUNT, SEGMENT_HEADER_SIZE,
};
use crate::error::{FormatError, LoadError};
use crate::segment::SegmentKind;
use crate::source::ByteSource;

const SEGMENTS_OFFSET: usize = 0x10;
const BUILD_ID_OFFSET: usize = 0x40;
const COMPRESSED_SIZES_OFFSET: usize = 0x60;
const EXTENTS_OFFSET: usize = 0x88;
const HASHES_OFFSET: usize = 0xA0;

bitflags! {
    /// Header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageFlags: u32 {
        const TEXT_COMPRESSED = 1 << 0;
        const RODATA_COMPRESSED = 1 << 1;
        const DATA_COMPRESSED = 1 << 2;
        const TEXT_CHECK_HASH = 1 << 3;
        const RODATA_CHECK_HASH = 1 << 4;
        const DATA_CHECK_HASH = 1 << 5;
    }
}

impl ImageFlags {
    /// Compression flag for `kind`.
    pub const fn compressed(kind: SegmentKind) -> Self {
        Self::from_bits_retain(1 << kind.index() as u32)
    }

    /// Hash-check flag for `kind`.
    pub const fn check_hash(kind: SegmentKind) -> Self {
        Self::from_bits_retain(1 << (kind.index() + SEGMENT_COUNT) as u32)
    }
}

/// Role-dependent last word of a segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentExtra {
    /// Alignment hint (text, rodata). Not used when loading.
    Alignment(u32),
    /// Size of the zero-filled region after the data segment.
    BssSize(u32),
}

impl SegmentExtra {
    fn decode(kind: SegmentKind, raw: u32) -> Self {
        match kind {
            SegmentKind::Data => SegmentExtra::BssSize(raw),
            SegmentKind::Code | SegmentKind::ReadOnlyData => SegmentExtra::Alignment(raw),
        }
    }

    fn raw(self) -> u32 {
        match self {
            SegmentExtra::Alignment(value) | SegmentExtra::BssSize(value) => value,
        }
    }
}

/// One segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Offset of the stored bytes in the file
    pub file_offset: u32,
    /// Destination offset from the load base
    pub memory_offset: u32,
    /// Decompressed size
    pub size: u32,
    /// Alignment hint or bss size
    pub extra: SegmentExtra,
}

impl SegmentHeader {
    /// Size of the trailing zero-filled region (data segment only).
    pub fn bss_size(&self) -> u32 {
        match self.extra {
            SegmentExtra::BssSize(size) => size,
            SegmentExtra::Alignment(_) => 0,
        }
    }

    /// Alignment hint (text and rodata only).
    pub fn alignment(&self) -> Option<u32> {
        match self.extra {
            SegmentExtra::Alignment(align) => Some(align),
            SegmentExtra::BssSize(_) => None,
        }
    }

    /// Bytes occupied in memory, bss included.
    pub fn memory_size(&self) -> u64 {
        self.size as u64 + self.bss_size() as u64
    }

    /// One past the last destination offset, bss included.
    pub fn memory_end(&self) -> u64 {
        self.memory_offset as u64 + self.memory_size()
    }
}

/// Region of the rodata segment holding auxiliary metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RodataExtent {
    /// Offset from the start of rodata
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

/// Decoded container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Format version
    pub version: u32,
    /// Compression and hash-check flags
    pub flags: ImageFlags,
    /// Text, rodata, data (in that order)
    pub segments: [SegmentHeader; SEGMENT_COUNT],
    /// Opaque build identifier
    pub build_id: [u8; BUILD_ID_SIZE],
    /// Stored sizes of compressed segments
    pub compressed_sizes: [u32; SEGMENT_COUNT],
    /// API info, dynstr and dynsym tables inside rodata
    pub extents: [RodataExtent; 3],
    /// SHA-256 of each decompressed segment
    pub hashes: [[u8; HASH_SIZE]; SEGMENT_COUNT],
}

fn read_u32(bytes: &[u8; HEADER_SIZE], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn write_u32(bytes: &mut [u8; HEADER_SIZE], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Check whether `source` starts with the container magic.
///
/// Only the first four bytes are inspected. Short, empty or unreadable
/// sources are simply not this format.
pub fn probe<S: ByteSource + ?Sized>(source: &S) -> bool {
    matches!(source.read(0, IMAGE_MAGIC.len()), Ok(magic) if magic[..] == IMAGE_MAGIC)
}

impl ImageHeader {
    /// Read and validate the header of `source`.
    pub fn read<S: ByteSource + ?Sized>(source: &S) -> Result<Self, LoadError> {
        let file_size = source.size();
        let raw = source.read(0, HEADER_SIZE)?;
        let bytes: &[u8; HEADER_SIZE] = raw
            .as_slice()
            .try_into()
            .map_err(|_| FormatError::Truncated { len: raw.len() as u64 })?;

        let header = Self::parse(bytes)?;
        header.validate(file_size)?;

        log::debug!(
            "[KPIO Loader] Header: version {} flags {:#x}",
            header.version,
            header.flags.bits()
        );
        log::debug!(
            "[KPIO Loader] text {:#x}@{:#x} rodata {:#x}@{:#x} data {:#x}@{:#x} bss {:#x}",
            header.segments[0].size,
            header.segments[0].memory_offset,
            header.segments[1].size,
            header.segments[1].memory_offset,
            header.segments[2].size,
            header.segments[2].memory_offset,
            header.segments[2].bss_size()
        );
        Ok(header)
    }

    /// Decode a raw header. Checks the magic only.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, FormatError> {
        if bytes[..4] != IMAGE_MAGIC {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&bytes[..4]);
            return Err(FormatError::BadMagic(magic));
        }

        let segments = SegmentKind::ALL.map(|kind| {
            let base = SEGMENTS_OFFSET + kind.index() * SEGMENT_HEADER_SIZE;
            SegmentHeader {
                file_offset: read_u32(bytes, base),
                memory_offset: read_u32(bytes, base + 4),
                size: read_u32(bytes, base + 8),
                extra: SegmentExtra::decode(kind, read_u32(bytes, base + 12)),
            }
        });

        let mut build_id = [0u8; BUILD_ID_SIZE];
        build_id.copy_from_slice(&bytes[BUILD_ID_OFFSET..BUILD_ID_OFFSET + BUILD_ID_SIZE]);

        let compressed_sizes =
            core::array::from_fn(|i| read_u32(bytes, COMPRESSED_SIZES_OFFSET + i * 4));

        let extents = core::array::from_fn(|i| RodataExtent {
            offset: read_u32(bytes, EXTENTS_OFFSET + i * 8),
            size: read_u32(bytes, EXTENTS_OFFSET + i * 8 + 4),
        });

        let hashes = core::array::from_fn(|i| {
            let start = HASHES_OFFSET + i * HASH_SIZE;
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(&bytes[start..start + HASH_SIZE]);
            hash
        });

        Ok(Self {
            version: read_u32(bytes, 0x04),
            flags: ImageFlags::from_bits_retain(read_u32(bytes, 0x0C)),
            segments,
            build_id,
            compressed_sizes,
            extents,
            hashes,
        })
    }

    /// Encode into the on-disk layout. Reserved fields are written as zero.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&IMAGE_MAGIC);
        write_u32(&mut bytes, 0x04, self.version);
        write_u32(&mut bytes, 0x0C, self.flags.bits());

        for (i, segment) in self.segments.iter().enumerate() {
            let base = SEGMENTS_OFFSET + i * SEGMENT_HEADER_SIZE;
            write_u32(&mut bytes, base, segment.file_offset);
            write_u32(&mut bytes, base + 4, segment.memory_offset);
            write_u32(&mut bytes, base + 8, segment.size);
            write_u32(&mut bytes, base + 12, segment.extra.raw());
        }

        bytes[BUILD_ID_OFFSET..BUILD_ID_OFFSET + BUILD_ID_SIZE].copy_from_slice(&self.build_id);

        for (i, size) in self.compressed_sizes.iter().enumerate() {
            write_u32(&mut bytes, COMPRESSED_SIZES_OFFSET + i * 4, *size);
        }
        for (i, extent) in self.extents.iter().enumerate() {
            write_u32(&mut bytes, EXTENTS_OFFSET + i * 8, extent.offset);
            write_u32(&mut bytes, EXTENTS_OFFSET + i * 8 + 4, extent.size);
        }
        for (i, hash) in self.hashes.iter().enumerate() {
            let start = HASHES_OFFSET + i * HASH_SIZE;
            bytes[start..start + HASH_SIZE].copy_from_slice(hash);
        }

        bytes
    }

    /// Header of segment `kind`.
    pub fn segment(&self, kind: SegmentKind) -> &SegmentHeader {
        &self.segments[kind.index()]
    }

    /// Whether segment `kind` is stored LZ4-compressed.
    pub fn is_segment_compressed(&self, kind: SegmentKind) -> bool {
        self.flags.contains(ImageFlags::compressed(kind))
    }

    /// Whether the header asks for segment `kind` to be hash-checked.
    pub fn should_check_hash(&self, kind: SegmentKind) -> bool {
        self.flags.contains(ImageFlags::check_hash(kind))
    }

    /// Stored compressed size of segment `kind`.
    pub fn compressed_size(&self, kind: SegmentKind) -> u32 {
        self.compressed_sizes[kind.index()]
    }

    /// Expected SHA-256 of segment `kind`.
    pub fn segment_hash(&self, kind: SegmentKind) -> &[u8; HASH_SIZE] {
        &self.hashes[kind.index()]
    }

    /// Number of bytes segment `kind` occupies in the file.
    pub fn stored_size(&self, kind: SegmentKind) -> u32 {
        if self.is_segment_compressed(kind) {
            self.compressed_size(kind)
        } else {
            self.segment(kind).size
        }
    }

    /// File range `[start, end)` of segment `kind`.
    pub fn file_range(&self, kind: SegmentKind) -> (u64, u64) {
        let start = self.segment(kind).file_offset as u64;
        (start, start + self.stored_size(kind) as u64)
    }

    /// Check the structural invariants against a file of `file_size` bytes.
    pub fn validate(&self, file_size: u64) -> Result<(), FormatError> {
        for kind in SegmentKind::ALL {
            let (start, end) = self.file_range(kind);
            if start == end {
                if self.is_segment_compressed(kind) && self.segment(kind).size != 0 {
                    return Err(FormatError::EmptyCompressedSegment { segment: kind });
                }
                continue;
            }
            if start < HEADER_SIZE as u64 {
                return Err(FormatError::OverlapsHeader { segment: kind });
            }
            if end > file_size {
                return Err(FormatError::SegmentOutOfBounds { segment: kind });
            }
        }

        for (i, first) in SegmentKind::ALL.iter().enumerate() {
            for second in &SegmentKind::ALL[i + 1..] {
                let (a_start, a_end) = self.file_range(*first);
                let (b_start, b_end) = self.file_range(*second);
                if a_start < a_end && b_start < b_end && a_start < b_end && b_start < a_end {
                    return Err(FormatError::FileOverlap {
                        first: *first,
                        second: *second,
                    });
                }
            }
        }

        for pair in SegmentKind::ALL.windows(2) {
            let prev = self.segment(pair[0]);
            let next = self.segment(pair[1]);
            if prev.memory_end() > next.memory_offset as u64 {
                return Err(FormatError::SegmentOrder { segment: pair[1] });
            }
        }

        let rodata_size = self.segment(SegmentKind::ReadOnlyData).size as u64;
        for (index, extent) in self.extents.iter().enumerate() {
            if extent.size != 0 && extent.offset as u64 + extent.size as u64 > rodata_size {
                return Err(FormatError::ExtentOutOfBounds { index });
            }
        }

        Ok(())
    }
}
