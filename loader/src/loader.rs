//! Image loader entry points.
//!
//! A load is a single synchronous pass:
//!
//! 1. Read and validate the header
//! 2. Materialize text, rodata and data (decompress, hash-check)
//! 3. Run the optional patcher
//! 4. Resolve the layout and commit every range
//! 5. Record the module in the registry
//!
//! Nothing touches the target address space until step 4, so a corrupt
//! segment anywhere in the image leaves the address space untouched.

use alloc::string::ToString;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::header::ImageHeader;
use crate::layout::{ArgumentHeader, ImageLayout};
use crate::memory::AddressSpace;
use crate::patch::{apply_patches, SegmentPatcher};
use crate::registry::{ModuleEntry, ModuleKind, ModuleRegistry};
use crate::segment::materialize_all;
use crate::source::ByteSource;

/// Per-call load options.
#[derive(Clone, Copy)]
pub struct LoadOptions<'a> {
    /// Argument bytes to inject after the image
    pub arguments: Option<&'a [u8]>,
    /// Primary image or additional module
    pub mode: ModuleKind,
    /// Rewrites segments before commit
    pub patcher: Option<&'a dyn SegmentPatcher>,
}

impl<'a> LoadOptions<'a> {
    /// Additional module, no arguments, no patcher.
    pub const fn new() -> Self {
        Self {
            arguments: None,
            mode: ModuleKind::Additional,
            patcher: None,
        }
    }

    /// Inject `arguments` after the image.
    pub const fn with_arguments(mut self, arguments: &'a [u8]) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Load as the primary image.
    pub const fn primary(mut self) -> Self {
        self.mode = ModuleKind::Primary;
        self
    }

    /// Run `patcher` over every segment before commit.
    pub const fn with_patcher(mut self, patcher: &'a dyn SegmentPatcher) -> Self {
        self.patcher = Some(patcher);
        self
    }
}

impl Default for LoadOptions<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for LoadOptions<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("arguments", &self.arguments.map(|a| a.len()))
            .field("mode", &self.mode)
            .field("patcher", &self.patcher.is_some())
            .finish()
    }
}

/// Result of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedModule {
    /// Load base
    pub base: u64,
    /// Entry point (start of text)
    pub entry_point: u64,
    /// Page-aligned end of the image; a base for the next module
    pub image_end: u64,
    /// Argument block address, if injected
    pub argument_address: Option<u64>,
}

/// Loader instance. Owns the module registry.
#[derive(Debug)]
pub struct ImageLoader {
    config: LoaderConfig,
    registry: ModuleRegistry,
    primary_loaded: AtomicBool,
}

impl ImageLoader {
    /// Create a loader with `config`.
    pub const fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            registry: ModuleRegistry::new(),
            primary_loaded: AtomicBool::new(false),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Module registry.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Snapshot of every module loaded so far, in load order.
    pub fn modules(&self) -> Vec<ModuleEntry> {
        self.registry.entries()
    }

    /// Load the primary image at the configured code region base.
    pub fn load<A, S>(
        &self,
        space: &mut A,
        source: &S,
        options: LoadOptions<'_>,
    ) -> Result<LoadedModule, LoadError>
    where
        A: AddressSpace + ?Sized,
        S: ByteSource + ?Sized,
    {
        self.load_module(space, source, self.config.code_region_base, options.primary())
    }

    /// Load the image in `source` at `load_base`.
    ///
    /// On success the module is recorded in the registry. On failure no
    /// range has been committed unless the address space itself refused a
    /// later range; see [`ImageLayout::commit`].
    pub fn load_module<A, S>(
        &self,
        space: &mut A,
        source: &S,
        load_base: u64,
        options: LoadOptions<'_>,
    ) -> Result<LoadedModule, LoadError>
    where
        A: AddressSpace + ?Sized,
        S: ByteSource + ?Sized,
    {
        log::debug!(
            "[KPIO Loader] Loading '{}' at {:#x} ({:?})",
            source.name(),
            load_base,
            options
        );

        if let Some(arguments) = options.arguments {
            ArgumentHeader::for_len(arguments.len())?;
        }

        let primary = options.mode == ModuleKind::Primary;
        if primary
            && self
                .primary_loaded
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Err(LoadError::AlreadyLoaded);
        }

        match self.load_and_commit(space, source, load_base, options) {
            Ok((module, header)) => {
                self.registry.record(ModuleEntry {
                    address: load_base,
                    name: source.name().to_string(),
                    kind: options.mode,
                    build_id: header.build_id,
                });
                log::info!(
                    "[KPIO Loader] Loaded '{}': entry {:#x}, image end {:#x}",
                    source.name(),
                    module.entry_point,
                    module.image_end
                );
                Ok(module)
            }
            Err(err) => {
                if primary {
                    self.primary_loaded.store(false, Ordering::Release);
                }
                log::warn!("[KPIO Loader] Failed to load '{}': {}", source.name(), err);
                Err(err)
            }
        }
    }

    fn load_and_commit<A, S>(
        &self,
        space: &mut A,
        source: &S,
        load_base: u64,
        options: LoadOptions<'_>,
    ) -> Result<(LoadedModule, ImageHeader), LoadError>
    where
        A: AddressSpace + ?Sized,
        S: ByteSource + ?Sized,
    {
        let header = ImageHeader::read(source)?;
        let mut segments = materialize_all(source, &header, self.config.hash_check)?;

        if let Some(patcher) = options.patcher {
            apply_patches(patcher, &mut segments)?;
        }

        let layout = ImageLayout::build(&header, load_base, segments, options.arguments)?;
        layout.commit(space)?;

        let module = LoadedModule {
            base: layout.base,
            entry_point: layout.entry_point,
            image_end: layout.image_end,
            argument_address: layout.argument_address,
        };
        Ok((module, header))
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}
