//! Byte sources the loader reads containers from.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::IoError;

/// Random-access, read-only view of a container file.
///
/// The loader borrows a source for the duration of one load and never
/// keeps it afterwards.
pub trait ByteSource {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// A source may return fewer bytes than requested when the read runs
    /// past its end; callers that need an exact length check it.
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError>;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Name recorded in the module registry.
    fn name(&self) -> &str;

    /// Read exactly `len` bytes at `offset`.
    fn read_exact(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        let bytes = self.read(offset, len)?;
        if bytes.len() != len {
            return Err(IoError::ShortRead {
                offset,
                expected: len,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        (**self).read(offset, len)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Named in-memory file.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap `data` under `name`.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Raw contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw contents.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl ByteSource for MemorySource {
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        let start = usize::try_from(offset).map_err(|_| IoError::OutOfBounds { offset })?;
        if start > self.data.len() {
            return Err(IoError::OutOfBounds { offset });
        }
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_read_clamps_at_end() {
        let source = MemorySource::new("main", vec![1, 2, 3, 4]);
        assert_eq!(source.read(2, 10).unwrap(), vec![3, 4]);
        assert_eq!(source.read(4, 1).unwrap(), Vec::<u8>::new());
        assert_eq!(source.read(5, 1), Err(IoError::OutOfBounds { offset: 5 }));
    }

    #[test]
    fn test_read_exact_reports_short_read() {
        let source = MemorySource::new("main", vec![0; 8]);
        assert_eq!(
            source.read_exact(6, 4),
            Err(IoError::ShortRead {
                offset: 6,
                expected: 4,
                actual: 2,
            })
        );
        assert_eq!(source.read_exact(0, 8).unwrap().len(), 8);
    }
}
