//! KPIO Executable Image Loader
//!
//! Loads three-segment executable images (text, rodata, data) into a
//! target address space.
//!
//! # Container Format
//!
//! - Fixed 256-byte little-endian header (`NSO0` magic)
//! - Per-segment LZ4 block compression
//! - Per-segment SHA-256 content hashes over the decompressed bytes
//! - Zero-filled bss after the data segment
//!
//! # Loading
//!
//! - All three segments are decoded and verified before anything is
//!   committed, so a corrupt image never leaves a partial mapping
//! - Text is committed R-X, rodata R--, data and bss RW-
//! - An optional argument block follows the image
//! - Every successful load is recorded in the module registry
//!
//! The file and the address space are collaborators supplied by the caller
//! through [`ByteSource`] and [`AddressSpace`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod builder;
pub mod config;
pub mod error;
pub mod format;
pub mod header;
pub mod layout;
pub mod loader;
pub mod memory;
pub mod patch;
pub mod registry;
pub mod segment;
pub mod source;

pub use builder::{BuildError, ImageBuilder};
pub use config::{HashCheck, LoaderConfig};
pub use error::{DecompressionError, FormatError, IoError, LoadError, MemoryError, ValidationError};
pub use format::ImageFormat;
pub use header::{ImageHeader, SegmentExtra, SegmentHeader};
pub use loader::{ImageLoader, LoadOptions, LoadedModule};
pub use memory::{AddressSpace, Permission, SparseAddressSpace, Unavailable};
pub use patch::{PatchError, SegmentPatcher};
pub use registry::{ModuleEntry, ModuleKind, ModuleRegistry};
pub use segment::{MaterializedSegment, SegmentKind};
pub use source::{ByteSource, MemorySource};
