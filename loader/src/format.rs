//! Supported container formats.
//!
//! Callers holding an unknown file try each format's probe in order and
//! load with the first one that matches.

use crate::error::LoadError;
use crate::header;
use crate::loader::{ImageLoader, LoadOptions, LoadedModule};
use crate::memory::AddressSpace;
use crate::source::ByteSource;

/// Container format handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Three-segment LZ4/SHA-256 image (`NSO0`)
    Nso,
}

impl ImageFormat {
    /// Formats in probe order.
    pub const ALL: [ImageFormat; 1] = [ImageFormat::Nso];

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            ImageFormat::Nso => "NSO",
        }
    }

    /// Whether `source` looks like this format. Never fails.
    pub fn probe<S: ByteSource + ?Sized>(self, source: &S) -> bool {
        match self {
            ImageFormat::Nso => header::probe(source),
        }
    }

    /// First format whose probe accepts `source`.
    pub fn identify<S: ByteSource + ?Sized>(source: &S) -> Option<ImageFormat> {
        Self::ALL.into_iter().find(|format| format.probe(source))
    }

    /// Load `source` with this format's loader.
    pub fn load<A, S>(
        self,
        loader: &ImageLoader,
        space: &mut A,
        source: &S,
        load_base: u64,
        options: LoadOptions<'_>,
    ) -> Result<LoadedModule, LoadError>
    where
        A: AddressSpace + ?Sized,
        S: ByteSource + ?Sized,
    {
        match self {
            ImageFormat::Nso => loader.load_module(space, source, load_base, options),
        }
    }
}
