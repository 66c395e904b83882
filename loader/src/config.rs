//! Loader configuration.
//!
//! Compile-time constants describing the container format and the memory
//! layout the loader produces, plus the runtime knobs of a loader instance.

/// Container magic signature.
pub const IMAGE_MAGIC: [u8; 4] = *b"NSO0";

/// Size of the container header in bytes.
pub const HEADER_SIZE: usize = 0x100;

/// Size of one segment descriptor in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 0x10;

/// Number of segments in every image.
pub const SEGMENT_COUNT: usize = 3;

/// Size of a segment content hash (SHA-256).
pub const HASH_SIZE: usize = 0x20;

/// Size of the build identifier.
pub const BUILD_ID_SIZE: usize = 0x20;

/// Page size (4 KB).
pub const PAGE_SIZE: u64 = 0x1000;

/// Total allocation reserved for the argument block.
pub const ARGUMENT_DATA_ALLOCATION_SIZE: usize = 0x9000;

/// Size of the argument block header.
pub const ARGUMENT_HEADER_SIZE: usize = 0x20;

/// Largest argument payload that fits the allocation.
pub const ARGUMENT_CAPACITY: usize = ARGUMENT_DATA_ALLOCATION_SIZE - ARGUMENT_HEADER_SIZE;

/// Default base of the code region for primary images.
pub const DEFAULT_CODE_REGION_BASE: u64 = 0x0000_0000_0800_0000;

/// Round `value` up to the next page boundary.
pub const fn page_align(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(v & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// When segment content hashes are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashCheck {
    /// Verify the segments whose hash-check flag is set in the header.
    #[default]
    FromHeader,
    /// Verify every segment regardless of header flags.
    Always,
    /// Never verify.
    Never,
}

/// Runtime configuration of an [`ImageLoader`](crate::ImageLoader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Hash verification policy.
    pub hash_check: HashCheck,
    /// Load base used by [`ImageLoader::load`](crate::ImageLoader::load).
    pub code_region_base: u64,
}

impl LoaderConfig {
    /// Default configuration.
    pub const fn new() -> Self {
        Self {
            hash_check: HashCheck::FromHeader,
            code_region_base: DEFAULT_CODE_REGION_BASE,
        }
    }

    /// Override the hash policy.
    pub const fn with_hash_check(mut self, hash_check: HashCheck) -> Self {
        self.hash_check = hash_check;
        self
    }

    /// Override the primary image load base.
    pub const fn with_code_region_base(mut self, base: u64) -> Self {
        self.code_region_base = base;
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_capacity() {
        assert_eq!(ARGUMENT_CAPACITY, 36_832);
    }

    #[test]
    fn test_page_align() {
        assert_eq!(page_align(0), Some(0));
        assert_eq!(page_align(1), Some(0x1000));
        assert_eq!(page_align(0x1000), Some(0x1000));
        assert_eq!(page_align(0x1234), Some(0x2000));
        assert_eq!(page_align(u64::MAX), None);
    }
}
