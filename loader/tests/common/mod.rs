//! Shared fixtures for loader integration tests.

#![allow(dead_code)]

use kpio_loader::{AddressSpace, ImageBuilder, Permission, SparseAddressSpace, Unavailable};

pub const LOAD_BASE: u64 = 0x0000_0000_8000_0000;

/// Address space that records every commit it is asked for.
pub struct RecordingSpace {
    pub inner: SparseAddressSpace,
    pub commits: Vec<(u64, usize, Permission)>,
    /// Refuse the commit with this index (0-based).
    pub refuse_at: Option<usize>,
}

impl RecordingSpace {
    pub fn new() -> Self {
        Self {
            inner: SparseAddressSpace::new(0x1000, 0x0000_7FFF_FFFF_F000),
            commits: Vec::new(),
            refuse_at: None,
        }
    }

    pub fn refusing_at(index: usize) -> Self {
        Self {
            refuse_at: Some(index),
            ..Self::new()
        }
    }
}

impl AddressSpace for RecordingSpace {
    fn commit(
        &mut self,
        address: u64,
        bytes: &[u8],
        permission: Permission,
    ) -> Result<(), Unavailable> {
        if self.refuse_at == Some(self.commits.len()) {
            return Err(Unavailable);
        }
        self.inner.commit(address, bytes, permission)?;
        self.commits.push((address, bytes.len(), permission));
        Ok(())
    }
}

pub fn text() -> Vec<u8> {
    (0..0x2400u32).map(|i| (i.wrapping_mul(31) >> 3) as u8).collect()
}

pub fn rodata() -> Vec<u8> {
    b"KPIO rodata \0".iter().cycle().take(0x900).copied().collect()
}

pub fn data() -> Vec<u8> {
    (0..0x300u32).map(|i| (i % 251) as u8).collect()
}

/// Image with every segment compressed and hash-checked.
pub fn sample_builder() -> ImageBuilder {
    ImageBuilder::new()
        .text(text())
        .rodata(rodata())
        .data(data())
        .bss_size(0x1800)
        .build_id([0x5A; 32])
        .compress_all(true)
        .check_all_hashes(true)
}
