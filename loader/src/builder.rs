//! Container builder.
//!
//! Packs three segment payloads into a container that satisfies every
//! header invariant: segments stored back to back after the header,
//! destination offsets page-aligned in text, rodata, data order, hashes
//! computed over the uncompressed bytes.

use alloc::vec::Vec;

use crate::config::{page_align, BUILD_ID_SIZE, HASH_SIZE, HEADER_SIZE, SEGMENT_COUNT};
use crate::error::FormatError;
use crate::header::{ImageFlags, ImageHeader, RodataExtent, SegmentExtra, SegmentHeader};
use crate::segment::{segment_hash, SegmentKind};

/// Reasons an [`ImageBuilder`] cannot produce a container.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("{segment} segment does not fit a 32-bit size field")]
    SegmentTooLarge { segment: SegmentKind },

    #[error("{segment} segment starts past the 32-bit file offset range")]
    FileTooLarge { segment: SegmentKind },

    #[error("{segment} segment ends past the 32-bit destination range")]
    AddressOverflow { segment: SegmentKind },

    #[error("built header is invalid: {0}")]
    Format(#[from] FormatError),
}

#[derive(Debug, Clone, Default)]
struct SegmentInput {
    data: Vec<u8>,
    memory_offset: Option<u32>,
    compress: bool,
    check_hash: bool,
}

/// Builder for container images.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    segments: [SegmentInput; SEGMENT_COUNT],
    bss_size: u32,
    version: u32,
    build_id: [u8; BUILD_ID_SIZE],
    extents: [RodataExtent; 3],
}

impl ImageBuilder {
    /// Empty image: three empty, uncompressed, unchecked segments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the contents of segment `kind`.
    pub fn segment(mut self, kind: SegmentKind, data: impl Into<Vec<u8>>) -> Self {
        self.segments[kind.index()].data = data.into();
        self
    }

    /// Set the text contents.
    pub fn text(self, data: impl Into<Vec<u8>>) -> Self {
        self.segment(SegmentKind::Code, data)
    }

    /// Set the rodata contents.
    pub fn rodata(self, data: impl Into<Vec<u8>>) -> Self {
        self.segment(SegmentKind::ReadOnlyData, data)
    }

    /// Set the data contents.
    pub fn data(self, data: impl Into<Vec<u8>>) -> Self {
        self.segment(SegmentKind::Data, data)
    }

    /// Size of the zero-filled region after data.
    pub fn bss_size(mut self, size: u32) -> Self {
        self.bss_size = size;
        self
    }

    /// Override the destination offset of segment `kind`.
    pub fn memory_offset(mut self, kind: SegmentKind, offset: u32) -> Self {
        self.segments[kind.index()].memory_offset = Some(offset);
        self
    }

    /// Store segment `kind` LZ4-compressed.
    pub fn compress(mut self, kind: SegmentKind, compress: bool) -> Self {
        self.segments[kind.index()].compress = compress;
        self
    }

    /// Compress every segment.
    pub fn compress_all(mut self, compress: bool) -> Self {
        for input in &mut self.segments {
            input.compress = compress;
        }
        self
    }

    /// Set the hash-check flag of segment `kind`.
    pub fn check_hash(mut self, kind: SegmentKind, check: bool) -> Self {
        self.segments[kind.index()].check_hash = check;
        self
    }

    /// Set the hash-check flag of every segment.
    pub fn check_all_hashes(mut self, check: bool) -> Self {
        for input in &mut self.segments {
            input.check_hash = check;
        }
        self
    }

    /// Format version field.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Build identifier.
    pub fn build_id(mut self, build_id: [u8; BUILD_ID_SIZE]) -> Self {
        self.build_id = build_id;
        self
    }

    /// Auxiliary rodata extent `index` (0: api info, 1: dynstr, 2: dynsym).
    pub fn extent(mut self, index: usize, extent: RodataExtent) -> Self {
        self.extents[index] = extent;
        self
    }

    /// Produce the header and the full container bytes.
    ///
    /// The header is validated against the finished container, so overridden
    /// destination offsets that break segment order are reported here.
    pub fn build_with_header(&self) -> Result<(ImageHeader, Vec<u8>), BuildError> {
        let mut flags = ImageFlags::empty();
        let mut segments = [SegmentHeader {
            file_offset: 0,
            memory_offset: 0,
            size: 0,
            extra: SegmentExtra::Alignment(0),
        }; SEGMENT_COUNT];
        let mut compressed_sizes = [0u32; SEGMENT_COUNT];
        let mut hashes = [[0u8; HASH_SIZE]; SEGMENT_COUNT];
        let mut body = Vec::new();

        let mut next_memory = Some(0u32);
        for kind in SegmentKind::ALL {
            let input = &self.segments[kind.index()];
            let size = u32::try_from(input.data.len())
                .map_err(|_| BuildError::SegmentTooLarge { segment: kind })?;
            let memory_offset = input
                .memory_offset
                .or(next_memory)
                .ok_or(BuildError::AddressOverflow { segment: kind })?;
            let memory_end = memory_offset
                .checked_add(size)
                .ok_or(BuildError::AddressOverflow { segment: kind })?;
            let file_offset = u32::try_from(HEADER_SIZE + body.len())
                .map_err(|_| BuildError::FileTooLarge { segment: kind })?;

            let stored = if input.compress {
                flags |= ImageFlags::compressed(kind);
                let packed = lz4_flex::block::compress(&input.data);
                compressed_sizes[kind.index()] = u32::try_from(packed.len())
                    .map_err(|_| BuildError::SegmentTooLarge { segment: kind })?;
                packed
            } else {
                input.data.clone()
            };
            if input.check_hash {
                flags |= ImageFlags::check_hash(kind);
            }

            let extra = match kind {
                SegmentKind::Data => SegmentExtra::BssSize(self.bss_size),
                _ => SegmentExtra::Alignment(1),
            };
            segments[kind.index()] = SegmentHeader {
                file_offset,
                memory_offset,
                size,
                extra,
            };
            hashes[kind.index()] = segment_hash(&input.data);

            body.extend_from_slice(&stored);
            next_memory = page_align(memory_end as u64).and_then(|end| u32::try_from(end).ok());
        }

        let header = ImageHeader {
            version: self.version,
            flags,
            segments,
            build_id: self.build_id,
            compressed_sizes,
            extents: self.extents,
            hashes,
        };

        let mut image = Vec::with_capacity(HEADER_SIZE + body.len());
        image.extend_from_slice(&header.to_bytes());
        image.extend_from_slice(&body);

        header.validate(image.len() as u64)?;
        Ok((header, image))
    }

    /// Produce the container bytes.
    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        Ok(self.build_with_header()?.1)
    }
}
