//! Target address space interface.
//!
//! The loader never maps memory itself. It hands each range, together with
//! its permission class, to an [`AddressSpace`] implementation owned by the
//! caller.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// Memory permission class of a committed range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;

        /// Code segments.
        const CODE = Self::READ.bits() | Self::EXECUTE.bits();
        /// Read-only data.
        const READ_ONLY = Self::READ.bits();
        /// Writable data, bss and argument blocks.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// The address space refused a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unavailable;

/// Address space a program image is committed into.
///
/// Implementations are responsible for reserving each range atomically;
/// the loader may share the space with other mutators.
pub trait AddressSpace {
    /// Reserve `[address, address + bytes.len())` with `permission` and
    /// copy `bytes` into it.
    fn commit(
        &mut self,
        address: u64,
        bytes: &[u8],
        permission: Permission,
    ) -> Result<(), Unavailable>;

    /// Commit `bytes` followed by `zero_len` zero bytes as one range.
    ///
    /// The default builds the full range in a heap buffer and passes it to
    /// [`commit`](AddressSpace::commit). Spaces that can map zero pages
    /// directly, or refuse the range up front, should override it.
    fn commit_zero_extended(
        &mut self,
        address: u64,
        bytes: &[u8],
        zero_len: u64,
        permission: Permission,
    ) -> Result<(), Unavailable> {
        if zero_len == 0 {
            return self.commit(address, bytes, permission);
        }
        let total = usize::try_from(zero_len)
            .ok()
            .and_then(|zeros| bytes.len().checked_add(zeros))
            .ok_or(Unavailable)?;

        let mut range = Vec::new();
        range.try_reserve_exact(total).map_err(|_| Unavailable)?;
        range.extend_from_slice(bytes);
        range.resize(total, 0);
        self.commit(address, &range, permission)
    }
}

impl<T: AddressSpace + ?Sized> AddressSpace for &mut T {
    fn commit(
        &mut self,
        address: u64,
        bytes: &[u8],
        permission: Permission,
    ) -> Result<(), Unavailable> {
        (**self).commit(address, bytes, permission)
    }

    fn commit_zero_extended(
        &mut self,
        address: u64,
        bytes: &[u8],
        zero_len: u64,
        permission: Permission,
    ) -> Result<(), Unavailable> {
        (**self).commit_zero_extended(address, bytes, zero_len, permission)
    }
}

/// A committed range in a [`SparseAddressSpace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRegion {
    /// Start address.
    pub start: u64,
    /// Permission class.
    pub permission: Permission,
    /// Contents.
    pub data: Vec<u8>,
}

impl MappedRegion {
    /// One past the last address.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }
}

/// In-memory address space backed by a sorted region map.
///
/// Commits outside `[base, limit)` or overlapping an existing region are
/// refused. Empty commits always succeed and record nothing.
#[derive(Debug, Clone)]
pub struct SparseAddressSpace {
    base: u64,
    limit: u64,
    regions: BTreeMap<u64, MappedRegion>,
}

impl SparseAddressSpace {
    /// Create an empty space covering `[base, limit)`.
    pub fn new(base: u64, limit: u64) -> Self {
        Self {
            base,
            limit,
            regions: BTreeMap::new(),
        }
    }

    /// Committed regions in address order.
    pub fn regions(&self) -> impl Iterator<Item = &MappedRegion> {
        self.regions.values()
    }

    /// Number of committed regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Region containing `address`.
    pub fn region_at(&self, address: u64) -> Option<&MappedRegion> {
        self.regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    /// Permission of the region containing `address`.
    pub fn permission_at(&self, address: u64) -> Option<Permission> {
        self.region_at(address).map(|region| region.permission)
    }

    /// Read `len` bytes at `address`; the range must lie inside one region.
    pub fn read(&self, address: u64, len: usize) -> Option<&[u8]> {
        let region = self.region_at(address)?;
        let start = (address - region.start) as usize;
        let end = start.checked_add(len)?;
        region.data.get(start..end)
    }

    fn is_free(&self, start: u64, end: u64) -> bool {
        if let Some((_, prev)) = self.regions.range(..start).next_back() {
            if prev.end() > start {
                return false;
            }
        }
        self.regions.range(start..end).next().is_none()
    }

    /// Check that `[address, address + len)` may be committed.
    fn check_range(&self, address: u64, len: u64) -> Result<(), Unavailable> {
        let end = address.checked_add(len).ok_or(Unavailable)?;
        if address < self.base || end > self.limit || !self.is_free(address, end) {
            return Err(Unavailable);
        }
        Ok(())
    }
}

impl AddressSpace for SparseAddressSpace {
    fn commit(
        &mut self,
        address: u64,
        bytes: &[u8],
        permission: Permission,
    ) -> Result<(), Unavailable> {
        self.commit_zero_extended(address, bytes, 0, permission)
    }

    fn commit_zero_extended(
        &mut self,
        address: u64,
        bytes: &[u8],
        zero_len: u64,
        permission: Permission,
    ) -> Result<(), Unavailable> {
        let len = (bytes.len() as u64)
            .checked_add(zero_len)
            .ok_or(Unavailable)?;
        if len == 0 {
            return Ok(());
        }
        self.check_range(address, len)?;

        let total = usize::try_from(len).map_err(|_| Unavailable)?;
        let mut data = Vec::new();
        data.try_reserve_exact(total).map_err(|_| Unavailable)?;
        data.extend_from_slice(bytes);
        data.resize(total, 0);

        self.regions.insert(
            address,
            MappedRegion {
                start: address,
                permission,
                data,
            },
        );
        Ok(())
    }
}
