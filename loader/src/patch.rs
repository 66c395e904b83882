//! Segment patch hook.
//!
//! A patcher sees each materialized segment once, after hashing and before
//! commit, and may replace its contents with a buffer of the same size.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{LoadError, ValidationError};
use crate::segment::{MaterializedSegment, SegmentKind};

/// Error raised by a [`SegmentPatcher`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct PatchError {
    /// Human-readable cause
    pub reason: String,
}

impl PatchError {
    /// Create a patch error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// External facility that rewrites segment contents before commit.
pub trait SegmentPatcher {
    /// Return the (possibly rewritten) contents of segment `kind`.
    fn transform(&self, kind: SegmentKind, data: Vec<u8>) -> Result<Vec<u8>, PatchError>;
}

/// Run `patcher` over every segment.
///
/// A patcher error or a size change fails the whole load; nothing is
/// retried.
pub fn apply_patches(
    patcher: &dyn SegmentPatcher,
    segments: &mut [MaterializedSegment],
) -> Result<(), LoadError> {
    for segment in segments.iter_mut() {
        let kind = segment.kind();
        let expected = segment.data().len();
        let patched = patcher
            .transform(kind, segment.take_data())
            .map_err(|source| ValidationError::Patch {
                segment: kind,
                source,
            })?;

        if patched.len() != expected {
            return Err(ValidationError::PatchSize {
                segment: kind,
                expected,
                actual: patched.len(),
            }
            .into());
        }

        log::debug!("[KPIO Loader] Patched {} segment", kind);
        segment.replace_data(patched);
    }
    Ok(())
}
