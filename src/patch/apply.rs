//! Generic patcher and transactional patch sets
//!
//! The primary `patch` path makes the site writable-executable and leaves
//! it that way; the patches are meant to outlive the tool, so symmetric
//! protection restore is intentionally absent here. The backup-capable
//! variant snapshots bytes and protection for callers that need rollback.

use windows_sys::Win32::System::Memory::PAGE_EXECUTE_READWRITE;

use crate::error::{GraftError, Result};
use crate::memory::scanner::Scanner;
use crate::memory::space::{MemorySpace, Range};
use crate::patch::table::PatchTable;

/// snapshot of a patch site, sufficient to undo the write
pub struct PatchBackup {
    pub address: usize,
    pub original: Vec<u8>,
    pub old_protection: u32,
}

impl PatchBackup {
    /// replay the snapshot: original bytes back, then original protection
    pub fn restore(&self, space: &MemorySpace) -> Result<()> {
        space.write(self.address, &self.original)?;
        space.protect(self.address, self.original.len(), self.old_protection)?;
        tracing::debug!(address = self.address, len = self.original.len(), "patch reverted");
        Ok(())
    }
}

/// locate `search` in `range` and write `replace` at the computed site
///
/// the patch site is `match + patch_offset` and exactly `replace.len()`
/// bytes are made writable; returns the patched address
pub fn patch(
    range: Range<'_>,
    search: &[u8],
    replace: &[u8],
    patch_offset: isize,
    context: &'static str,
) -> Result<usize> {
    let (address, _) = patch_inner(range, search, replace, patch_offset, context)?;
    Ok(address)
}

/// like [`patch`], but snapshots the site first so it can be undone
pub fn patch_with_backup(
    range: Range<'_>,
    search: &[u8],
    replace: &[u8],
    patch_offset: isize,
    context: &'static str,
) -> Result<PatchBackup> {
    let (address, backup) = patch_inner(range, search, replace, patch_offset, context)?;
    debug_assert_eq!(address, backup.address);
    Ok(backup)
}

fn patch_inner(
    range: Range<'_>,
    search: &[u8],
    replace: &[u8],
    patch_offset: isize,
    context: &'static str,
) -> Result<(usize, PatchBackup)> {
    let space = range.base.space;
    let hit = Scanner::new(range)
        .find(search)?
        .ok_or(GraftError::PatternNotFound { context })?;
    let site = hit.offset(patch_offset);

    let backup = write_at(space, site.addr, replace)?;
    tracing::info!(
        context,
        address = site.addr,
        len = replace.len(),
        pid = space.pid(),
        "patched"
    );
    Ok((site.addr, backup))
}

/// select the table entry for `build` and apply it over `range`
pub fn apply_for_build(range: Range<'_>, table: &PatchTable, build: u32) -> Result<usize> {
    let entry = table.select(build)?;
    patch(
        range,
        entry.search,
        entry.replace,
        entry.patch_offset,
        table.context,
    )
}

/// make `address` writable, snapshot it, and write `bytes`
///
/// used directly for pointer-slot overwrites where no signature scan is
/// involved
pub fn write_at(space: &MemorySpace, address: usize, bytes: &[u8]) -> Result<PatchBackup> {
    let old_protection = space.protect(address, bytes.len(), PAGE_EXECUTE_READWRITE)?;
    let original = space.read_vec(address, bytes.len())?;
    space.write(address, bytes)?;
    Ok(PatchBackup {
        address,
        original,
        old_protection,
    })
}

/// scoped transaction over multiple coordinated patch sites
///
/// every applied patch is rolled back in reverse order when the set is
/// dropped, unless `commit` is called; a failure partway through a
/// multi-site install therefore unwinds the sites already written
pub struct PatchSet<'s> {
    space: &'s MemorySpace,
    applied: Vec<PatchBackup>,
    committed: bool,
}

impl<'s> PatchSet<'s> {
    pub fn new(space: &'s MemorySpace) -> Self {
        Self {
            space,
            applied: Vec::new(),
            committed: false,
        }
    }

    /// scan-and-patch one site as part of this set
    pub fn patch(
        &mut self,
        range: Range<'s>,
        search: &[u8],
        replace: &[u8],
        patch_offset: isize,
        context: &'static str,
    ) -> Result<usize> {
        let (address, backup) = patch_inner(range, search, replace, patch_offset, context)?;
        self.applied.push(backup);
        Ok(address)
    }

    /// write raw bytes at a known address as part of this set
    pub fn write_at(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
        let backup = write_at(self.space, address, bytes)?;
        self.applied.push(backup);
        Ok(())
    }

    /// number of sites written so far
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// keep all writes; consumes the backups
    pub fn commit(mut self) -> Vec<PatchBackup> {
        self.committed = true;
        core::mem::take(&mut self.applied)
    }
}

impl Drop for PatchSet<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for backup in self.applied.iter().rev() {
            let _ = backup.restore(self.space);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows_sys::Win32::System::Memory::{
        VirtualQuery, MEMORY_BASIC_INFORMATION, PAGE_READWRITE,
    };

    fn scratch(space: &MemorySpace, bytes: &[u8]) -> crate::memory::Allocation<'_> {
        let alloc = space.allocate(0x1000, PAGE_READWRITE).unwrap();
        space.write(alloc.base(), bytes).unwrap();
        alloc
    }

    fn protection_of(address: usize) -> u32 {
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { core::mem::zeroed() };
        // SAFETY: info is a valid out-buffer of the exact expected size
        let len = unsafe {
            VirtualQuery(
                address as *const core::ffi::c_void,
                &mut info,
                core::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        assert!(len > 0);
        info.Protect
    }

    #[test]
    fn test_patch_writes_at_offset() {
        let space = MemorySpace::Own;
        let mut data = vec![0u8; 32];
        data[5..8].copy_from_slice(&[0xAA, 0xBB, 0xCC]);
        let alloc = scratch(&space, &data);

        let addr = patch(
            space.range(alloc.base(), 32),
            &[0xAA, 0xBB, 0xCC],
            &[0x90, 0x90],
            3,
            "test",
        )
        .unwrap();
        assert_eq!(addr, alloc.base() + 8);
        assert_eq!(space.read_vec(addr, 2).unwrap(), [0x90, 0x90]);
        // search pattern itself untouched
        assert_eq!(
            space.read_vec(alloc.base() + 5, 3).unwrap(),
            [0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn test_patch_missing_pattern() {
        let space = MemorySpace::Own;
        let alloc = scratch(&space, &[0u8; 32]);

        let err = patch(space.range(alloc.base(), 32), &[0xDE, 0xAD], &[0x90], 0, "test");
        assert!(matches!(
            err,
            Err(GraftError::PatternNotFound { context: "test" })
        ));
    }

    #[test]
    fn test_backup_roundtrip() {
        let space = MemorySpace::Own;
        let original = [0x11u8, 0x22, 0x33, 0x44];
        let alloc = scratch(&space, &original);

        let backup = patch_with_backup(
            space.range(alloc.base(), 4),
            &[0x11, 0x22],
            &[0xEE, 0xFF],
            0,
            "test",
        )
        .unwrap();
        assert_eq!(space.read_vec(alloc.base(), 4).unwrap(), [0xEE, 0xFF, 0x33, 0x44]);
        assert_eq!(protection_of(alloc.base()), PAGE_EXECUTE_READWRITE);

        backup.restore(&space).unwrap();
        assert_eq!(space.read_vec(alloc.base(), 4).unwrap(), original);
        // protection comes back with the bytes
        assert_eq!(protection_of(alloc.base()), PAGE_READWRITE);
    }

    #[test]
    fn test_apply_for_build_selects_entry() {
        use crate::patch::table::PatchEntry;
        use crate::version::builds;

        const TABLE: PatchTable = PatchTable {
            context: "test-driver",
            entries: &[
                PatchEntry {
                    min_build: builds::VISTA,
                    search: &[0x10, 0x20],
                    replace: &[0xEE],
                    patch_offset: 0,
                    aux_offset: 0,
                },
                PatchEntry {
                    min_build: builds::WIN_8,
                    search: &[0x30, 0x40],
                    replace: &[0xEE],
                    patch_offset: 1,
                    aux_offset: 0,
                },
            ],
        };

        let space = MemorySpace::Own;
        let alloc = scratch(&space, &[0x10, 0x20, 0x00, 0x30, 0x40, 0x00]);

        // win8 floor picks the second entry and patches at match+1
        let addr = apply_for_build(space.range(alloc.base(), 6), &TABLE, builds::WIN_BLUE).unwrap();
        assert_eq!(addr, alloc.base() + 4);
        assert_eq!(space.read_vec(alloc.base() + 4, 1).unwrap(), [0xEE]);

        let err = apply_for_build(space.range(alloc.base(), 6), &TABLE, builds::XP);
        assert!(matches!(err, Err(GraftError::UnsupportedBuild { .. })));
    }

    #[test]
    fn test_patch_set_rollback_on_drop() {
        let space = MemorySpace::Own;
        let alloc = scratch(&space, &[0x01, 0x02, 0x03, 0x04]);

        {
            let mut set = PatchSet::new(&space);
            set.write_at(alloc.base(), &[0xAA]).unwrap();
            set.write_at(alloc.base() + 2, &[0xBB]).unwrap();
            assert_eq!(space.read_vec(alloc.base(), 4).unwrap(), [0xAA, 0x02, 0xBB, 0x04]);
            // dropped without commit
        }
        assert_eq!(space.read_vec(alloc.base(), 4).unwrap(), [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_patch_set_commit_keeps_writes() {
        let space = MemorySpace::Own;
        let alloc = scratch(&space, &[0x01, 0x02]);

        let mut set = PatchSet::new(&space);
        set.write_at(alloc.base(), &[0xAA]).unwrap();
        let backups = set.commit();
        assert_eq!(backups.len(), 1);
        assert_eq!(space.read_vec(alloc.base(), 2).unwrap(), [0xAA, 0x02]);
    }
}
