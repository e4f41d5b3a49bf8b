//! Pattern tables keyed by minimum OS build
//!
//! Binary layouts shift between OS releases, so every patchable site is
//! described by a table of {build floor, search bytes, replacement bytes,
//! offsets} and the entry with the highest floor at or below the running
//! build wins.

use crate::error::{GraftError, Result};

/// one build-conditional patch description
#[derive(Debug, Clone, Copy)]
pub struct PatchEntry {
    /// lowest build this entry applies to
    pub min_build: u32,
    /// byte signature located by the scanner
    pub search: &'static [u8],
    /// bytes written at the patch site
    pub replace: &'static [u8],
    /// signed displacement from the match start to the patch site
    pub patch_offset: isize,
    /// second entry-specific offset; for prologue splices this is the
    /// number of displaced prologue bytes
    pub aux_offset: isize,
}

/// a named table of build-conditional entries, ascending by build floor
#[derive(Debug, Clone, Copy)]
pub struct PatchTable {
    /// site name used in logs and error context
    pub context: &'static str,
    pub entries: &'static [PatchEntry],
}

impl PatchTable {
    /// select the entry with the greatest `min_build` that is <= `build`
    pub fn select(&self, build: u32) -> Result<&PatchEntry> {
        self.entries
            .iter()
            .filter(|e| e.min_build <= build)
            .max_by_key(|e| e.min_build)
            .ok_or(GraftError::UnsupportedBuild { build })
    }
}
