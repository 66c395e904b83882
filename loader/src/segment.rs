//! Segment materialization.
//!
//! Turns the stored bytes of one segment into its final in-memory contents:
//! read, LZ4-decompress when flagged, then check the SHA-256 content hash.
//! A buffer leaves this module only at exactly the declared size.

use alloc::vec::Vec;
use core::fmt;
use sha2::{Digest, Sha256};

use crate::config::{HashCheck, HASH_SIZE, SEGMENT_COUNT};
use crate::error::{DecompressionError, LoadError, ValidationError};
use crate::header::ImageHeader;
use crate::memory::Permission;
use crate::source::ByteSource;

/// Role of a segment within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentKind {
    /// Executable code (`.text`)
    Code,
    /// Read-only data (`.rodata`)
    ReadOnlyData,
    /// Writable data (`.data`), followed by bss
    Data,
}

impl SegmentKind {
    /// All roles in header order.
    pub const ALL: [SegmentKind; SEGMENT_COUNT] =
        [SegmentKind::Code, SegmentKind::ReadOnlyData, SegmentKind::Data];

    /// Index of this segment in the header tables.
    pub const fn index(self) -> usize {
        match self {
            SegmentKind::Code => 0,
            SegmentKind::ReadOnlyData => 1,
            SegmentKind::Data => 2,
        }
    }

    /// Permission class the segment is committed with.
    pub const fn permission(self) -> Permission {
        match self {
            SegmentKind::Code => Permission::CODE,
            SegmentKind::ReadOnlyData => Permission::READ_ONLY,
            SegmentKind::Data => Permission::READ_WRITE,
        }
    }

    /// Short name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            SegmentKind::Code => "text",
            SegmentKind::ReadOnlyData => "rodata",
            SegmentKind::Data => "data",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded contents of one segment, ready to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedSegment {
    kind: SegmentKind,
    data: Vec<u8>,
}

impl MaterializedSegment {
    pub(crate) fn new(kind: SegmentKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Role of the segment.
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// Permission class the segment is committed with.
    pub fn permission(&self) -> Permission {
        self.kind.permission()
    }

    /// Decoded bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the decoded bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn take_data(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.data)
    }

    pub(crate) fn replace_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}

/// Read, decompress and verify the segment `kind` of the image.
pub fn materialize<S: ByteSource + ?Sized>(
    source: &S,
    header: &ImageHeader,
    kind: SegmentKind,
    hash_check: HashCheck,
) -> Result<MaterializedSegment, LoadError> {
    let segment = header.segment(kind);
    let size = segment.size as usize;

    let data = if header.is_segment_compressed(kind) {
        let stored_len = header.compressed_size(kind) as usize;
        let stored = source.read_exact(segment.file_offset as u64, stored_len)?;
        decompress(&stored, size).map_err(|source| LoadError::Decompression {
            segment: kind,
            source,
        })?
    } else {
        source.read_exact(segment.file_offset as u64, size)?
    };

    let verify = match hash_check {
        HashCheck::FromHeader => header.should_check_hash(kind),
        HashCheck::Always => true,
        HashCheck::Never => false,
    };
    if verify && !hash_matches(&data, header.segment_hash(kind)) {
        log::warn!("[KPIO Loader] {} segment hash mismatch", kind);
        return Err(ValidationError::HashMismatch { segment: kind }.into());
    }

    log::debug!(
        "[KPIO Loader] Materialized {} segment: {:#x} bytes (compressed: {}, verified: {})",
        kind,
        size,
        header.is_segment_compressed(kind),
        verify
    );

    Ok(MaterializedSegment::new(kind, data))
}

/// Materialize all three segments, stopping at the first failure.
pub fn materialize_all<S: ByteSource + ?Sized>(
    source: &S,
    header: &ImageHeader,
    hash_check: HashCheck,
) -> Result<[MaterializedSegment; SEGMENT_COUNT], LoadError> {
    let code = materialize(source, header, SegmentKind::Code, hash_check)?;
    let rodata = materialize(source, header, SegmentKind::ReadOnlyData, hash_check)?;
    let data = materialize(source, header, SegmentKind::Data, hash_check)?;
    Ok([code, rodata, data])
}

/// Largest output an LZ4 block of `stored` bytes can decode to.
///
/// A match token adds at most 255 bytes of output per input byte; the
/// slack covers the token and offset of the final sequence.
pub const fn lz4_max_expansion(stored: usize) -> usize {
    stored.saturating_mul(255).saturating_add(16)
}

/// Decompress an LZ4 block into exactly `size` bytes.
///
/// `size` comes from the header and is checked against the stored length
/// before any output buffer is allocated.
fn decompress(stored: &[u8], size: usize) -> Result<Vec<u8>, DecompressionError> {
    if stored.is_empty() && size == 0 {
        return Ok(Vec::new());
    }
    if size > lz4_max_expansion(stored.len()) {
        return Err(DecompressionError::SizeExceedsBound {
            expected: size,
            stored: stored.len(),
        });
    }

    let mut out = Vec::new();
    out.try_reserve_exact(size)
        .map_err(|_| DecompressionError::OutOfMemory { expected: size })?;
    out.resize(size, 0);
    let written = match lz4_flex::block::decompress_into(stored, &mut out) {
        Ok(written) => written,
        Err(lz4_flex::block::DecompressError::OutputTooSmall { .. }) => {
            return Err(DecompressionError::Overrun { expected: size })
        }
        Err(_) => return Err(DecompressionError::Codec),
    };

    if written != size {
        return Err(DecompressionError::LengthMismatch {
            expected: size,
            actual: written,
        });
    }
    Ok(out)
}

/// SHA-256 of `data`.
pub fn segment_hash(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

fn hash_matches(data: &[u8], expected: &[u8; HASH_SIZE]) -> bool {
    segment_hash(data) == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompress_exact_length() {
        let plain = [7u8; 300];
        let packed = lz4_flex::block::compress(&plain);
        assert_eq!(decompress(&packed, 300).unwrap(), plain.to_vec());
    }

    #[test]
    fn test_decompress_short_output() {
        let packed = lz4_flex::block::compress(&[1u8; 100]);
        assert_eq!(
            decompress(&packed, 128),
            Err(DecompressionError::LengthMismatch {
                expected: 128,
                actual: 100,
            })
        );
    }

    #[test]
    fn test_decompress_long_output() {
        let packed = lz4_flex::block::compress(&[1u8; 200]);
        assert!(matches!(
            decompress(&packed, 128),
            Err(DecompressionError::Overrun { expected: 128 }) | Err(DecompressionError::Codec)
        ));
    }

    #[test]
    fn test_decompress_rejects_implausible_size() {
        let packed = lz4_flex::block::compress(&[0u8; 16]);
        assert_eq!(
            decompress(&packed, 0xFFFF_0000),
            Err(DecompressionError::SizeExceedsBound {
                expected: 0xFFFF_0000,
                stored: packed.len(),
            })
        );
    }

    #[test]
    fn test_decompress_highly_compressible_within_bound() {
        let plain = vec![0u8; 0x10_0000];
        let packed = lz4_flex::block::compress(&plain);
        assert!(plain.len() <= lz4_max_expansion(packed.len()));
        assert_eq!(decompress(&packed, plain.len()).unwrap(), plain);
    }

    #[test]
    fn test_decompress_garbage() {
        assert!(decompress(&[0xFF, 0xFF, 0xFF], 64).is_err());
    }

    #[test]
    fn test_segment_roles() {
        assert_eq!(SegmentKind::Code.permission(), Permission::CODE);
        assert_eq!(SegmentKind::ReadOnlyData.permission(), Permission::READ_ONLY);
        assert_eq!(SegmentKind::Data.permission(), Permission::READ_WRITE);
        for (i, kind) in SegmentKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_segment_hash_known_value() {
        // SHA-256("abc")
        let digest = segment_hash(b"abc");
        assert_eq!(digest[..4], [0xba, 0x78, 0x16, 0xbf]);
        assert_eq!(digest[28..], [0xf2, 0x00, 0x15, 0xad]);
    }
}
