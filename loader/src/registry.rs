//! Module Registry
//!
//! Append-only record of the modules a loader instance has placed, for
//! debuggers and other introspection tools. Entries are immutable once
//! recorded; appends are serialized by a spin lock.

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use crate::config::BUILD_ID_SIZE;

/// How a module was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Main program image
    Primary,
    /// Additional module loaded next to the main image
    Additional,
}

/// One loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Load base
    pub address: u64,
    /// Name of the source file
    pub name: String,
    /// Primary or additional
    pub kind: ModuleKind,
    /// Build identifier from the header
    pub build_id: [u8; BUILD_ID_SIZE],
}

/// Insertion-ordered module registry.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    entries: Mutex<Vec<ModuleEntry>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append an entry.
    pub fn record(&self, entry: ModuleEntry) {
        log::info!(
            "[KPIO Loader] Registered module '{}' at {:#x} ({:?})",
            entry.name,
            entry.address,
            entry.kind
        );
        self.entries.lock().push(entry);
    }

    /// Snapshot of all entries in load order.
    pub fn entries(&self) -> Vec<ModuleEntry> {
        self.entries.lock().clone()
    }

    /// Number of recorded modules.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been loaded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a primary image has been recorded.
    pub fn has_primary(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.kind == ModuleKind::Primary)
    }

    /// Module whose load base is `address`.
    pub fn find(&self, address: u64) -> Option<ModuleEntry> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.address == address)
            .cloned()
    }
}
