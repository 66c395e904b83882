//! Image layout and commit.
//!
//! Resolves every segment to an absolute address, attaches its permission
//! class and the length of any zero-filled tail, then hands the ranges to
//! the target address space in order. Bss is never materialized here; the
//! address space zero-fills it on commit.
//!
//! # Memory Layout
//!
//! ```text
//!   base + text.offset    +-------------------+  R-X
//!                         | text              |
//!   base + rodata.offset  +-------------------+  R--
//!                         | rodata            |
//!   base + data.offset    +-------------------+  RW-
//!                         | data              |
//!                         | bss (zeroed)      |
//!   page aligned          +-------------------+  RW-  (optional)
//!                         | argument header   |
//!                         | argument bytes    |
//!   image end             +-------------------+
//! ```
//!
//! The whole plan, including every address computation, is built before the
//! first range is committed.

use alloc::vec::Vec;

use crate::config::{
    page_align, ARGUMENT_CAPACITY, ARGUMENT_DATA_ALLOCATION_SIZE, ARGUMENT_HEADER_SIZE,
    SEGMENT_COUNT,
};
use crate::error::{LoadError, MemoryError};
use crate::header::ImageHeader;
use crate::memory::{AddressSpace, Permission};
use crate::segment::{MaterializedSegment, SegmentKind};

/// Header of the argument block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentHeader {
    /// Bytes available for arguments
    pub allocated_size: u32,
    /// Bytes of arguments actually present
    pub actual_size: u32,
}

impl ArgumentHeader {
    /// Header describing `len` argument bytes.
    pub fn for_len(len: usize) -> Result<Self, LoadError> {
        if len > ARGUMENT_CAPACITY {
            return Err(LoadError::Argument {
                len,
                capacity: ARGUMENT_CAPACITY,
            });
        }
        Ok(Self {
            allocated_size: ARGUMENT_CAPACITY as u32,
            actual_size: len as u32,
        })
    }

    /// Encode, reserved bytes zeroed.
    pub fn to_bytes(&self) -> [u8; ARGUMENT_HEADER_SIZE] {
        let mut bytes = [0u8; ARGUMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.allocated_size.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.actual_size.to_le_bytes());
        bytes
    }

    /// Decode from the start of an argument block.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let allocated = bytes.get(0..4)?.try_into().ok()?;
        let actual = bytes.get(4..8)?.try_into().ok()?;
        Some(Self {
            allocated_size: u32::from_le_bytes(allocated),
            actual_size: u32::from_le_bytes(actual),
        })
    }
}

/// Build the full argument allocation for `args`.
pub fn encode_argument_block(args: &[u8]) -> Result<Vec<u8>, LoadError> {
    let header = ArgumentHeader::for_len(args.len())?;
    let mut block = Vec::with_capacity(ARGUMENT_DATA_ALLOCATION_SIZE);
    block.extend_from_slice(&header.to_bytes());
    block.extend_from_slice(args);
    block.resize(ARGUMENT_DATA_ALLOCATION_SIZE, 0);
    Ok(block)
}

/// What a committed range holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// One of the three image segments
    Segment(SegmentKind),
    /// Injected argument block
    Arguments,
}

/// One range to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRange {
    /// Contents
    pub kind: RangeKind,
    /// Absolute start address
    pub address: u64,
    /// Permission class
    pub permission: Permission,
    /// Bytes to write
    pub data: Vec<u8>,
    /// Zero bytes following `data` in the same range (bss)
    pub zero_fill: u64,
}

impl CommitRange {
    /// Total length in memory.
    pub fn len(&self) -> u64 {
        self.data.len() as u64 + self.zero_fill
    }

    /// Whether the range covers no memory.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fully resolved placement of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    /// Load base
    pub base: u64,
    /// Absolute entry point (start of text)
    pub entry_point: u64,
    /// Page-aligned end of everything committed for this image
    pub image_end: u64,
    /// Address of the argument block, if injected
    pub argument_address: Option<u64>,
    /// Ranges in commit order
    pub ranges: Vec<CommitRange>,
}

fn resolve(base: u64, offset: u64) -> Result<u64, MemoryError> {
    base.checked_add(offset).ok_or(MemoryError::AddressOverflow)
}

impl ImageLayout {
    /// Place `segments` at `base`, optionally followed by an argument block.
    pub fn build(
        header: &ImageHeader,
        base: u64,
        segments: [MaterializedSegment; SEGMENT_COUNT],
        arguments: Option<&[u8]>,
    ) -> Result<Self, LoadError> {
        let argument_block = arguments.map(encode_argument_block).transpose()?;

        let mut ranges = Vec::with_capacity(SEGMENT_COUNT + 1);
        for segment in segments {
            let kind = segment.kind();
            let seg_header = header.segment(kind);
            let address = resolve(base, seg_header.memory_offset as u64)?;
            resolve(address, seg_header.memory_size())?;

            // bss follows data directly and is committed as one range
            let zero_fill = match kind {
                SegmentKind::Data => seg_header.bss_size() as u64,
                _ => 0,
            };

            ranges.push(CommitRange {
                kind: RangeKind::Segment(kind),
                address,
                permission: kind.permission(),
                data: segment.into_data(),
                zero_fill,
            });
        }

        let data_end = resolve(base, header.segment(SegmentKind::Data).memory_end())?;
        let mut image_end = page_align(data_end).ok_or(MemoryError::AddressOverflow)?;

        let mut argument_address = None;
        if let Some(block) = argument_block {
            let address = image_end;
            image_end = resolve(address, block.len() as u64)?;
            argument_address = Some(address);
            ranges.push(CommitRange {
                kind: RangeKind::Arguments,
                address,
                permission: Permission::READ_WRITE,
                data: block,
                zero_fill: 0,
            });
        }

        let entry_point = resolve(base, header.segment(SegmentKind::Code).memory_offset as u64)?;

        Ok(Self {
            base,
            entry_point,
            image_end,
            argument_address,
            ranges,
        })
    }

    /// Commit every range into `space`, in order.
    ///
    /// Stops at the first refused range. Ranges committed before it stay
    /// committed; undoing them is up to the owner of `space`.
    pub fn commit<A: AddressSpace + ?Sized>(&self, space: &mut A) -> Result<(), LoadError> {
        for range in &self.ranges {
            space
                .commit_zero_extended(range.address, &range.data, range.zero_fill, range.permission)
                .map_err(|_| {
                    log::warn!(
                        "[KPIO Loader] Commit refused: {:?} at {:#x} ({:#x} bytes)",
                        range.kind,
                        range.address,
                        range.len()
                    );
                    MemoryError::Unavailable {
                        address: range.address,
                        len: range.len(),
                        permission: range.permission,
                    }
                })?;

            log::debug!(
                "[KPIO Loader] Committed {:?} at {:#x} ({:#x} bytes, {:?})",
                range.kind,
                range.address,
                range.len(),
                range.permission
            );
        }
        Ok(())
    }
}
