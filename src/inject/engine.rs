//! Placeholder resolution and remote commit
//!
//! Every reference is resolved into a local copy of the blob before any
//! remote allocation happens: a failed export lookup leaves the target
//! completely untouched, and at most one remote allocation occurs per
//! grafted blob.

use windows_sys::Win32::System::Memory::PAGE_EXECUTE_READWRITE;

use crate::error::Result;
use crate::inject::template::{resolve_placeholders, CodeTemplate, ExternRef, ExternTarget};
use crate::memory::space::{Allocation, MemorySpace};
use crate::process::exports::find_export;
use crate::process::modules::find_module;

/// resolve each reference to an absolute address in the target space
pub fn resolve_refs(space: &MemorySpace, refs: &[ExternRef]) -> Result<Vec<(u64, usize)>> {
    let mut resolved = Vec::with_capacity(refs.len());
    for r in refs {
        let address = match r.target {
            ExternTarget::Address(a) => a,
            ExternTarget::Export { module, symbol } => {
                let m = find_module(space.pid(), module)?;
                find_export(space, m.base, symbol)?
            }
        };
        resolved.push((r.placeholder, address));
    }
    Ok(resolved)
}

/// graft a template into the target space
///
/// returns the RWX allocation holding the rewritten blob; callers that
/// install a permanent hook leak it, callers making a one-shot call free
/// it by dropping
pub fn inject<'s>(space: &'s MemorySpace, template: &CodeTemplate) -> Result<Allocation<'s>> {
    inject_with_refs(space, template, &[])
}

/// like [`inject`], with extra caller-computed resolutions appended
pub fn inject_with_refs<'s>(
    space: &'s MemorySpace,
    template: &CodeTemplate,
    extra: &[(u64, usize)],
) -> Result<Allocation<'s>> {
    let mut resolved = resolve_refs(space, &template.refs)?;
    resolved.extend_from_slice(extra);

    let mut blob = template.code.to_vec();
    resolve_placeholders(&mut blob, template.arch, &resolved)?;

    // nothing remote has happened up to this point
    let alloc = space.allocate(blob.len(), PAGE_EXECUTE_READWRITE)?;
    space.write(alloc.base(), &blob)?;
    tracing::info!(
        pid = space.pid(),
        address = alloc.base(),
        size = blob.len(),
        "code grafted"
    );
    Ok(alloc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::error::GraftError;
    use crate::inject::template::placeholders;

    // mov rax, SLOT_A ; ret
    const BLOB: &[u8] = &[
        0x48, 0xB8, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0xC3,
    ];

    #[test]
    fn test_inject_rewrites_blob_in_place() {
        let space = MemorySpace::Own;
        let template = CodeTemplate::new(Arch::X64, BLOB)
            .with_address(placeholders::SLOT_A, 0x7FF0_0000_1000);

        let alloc = inject(&space, &template).unwrap();
        let committed = space.read_vec(alloc.base(), BLOB.len()).unwrap();
        assert_eq!(
            u64::from_le_bytes(committed[2..10].try_into().unwrap()),
            0x7FF0_0000_1000
        );
        assert_eq!(committed[10], 0xC3);
    }

    #[test]
    fn test_inject_resolves_real_export() {
        let space = MemorySpace::Own;
        let template =
            CodeTemplate::new(Arch::X64, BLOB).with_export(placeholders::SLOT_A, "kernel32.dll", "Sleep");

        let alloc = inject(&space, &template).unwrap();
        let committed = space.read_vec(alloc.base(), BLOB.len()).unwrap();
        let addr = u64::from_le_bytes(committed[2..10].try_into().unwrap());
        let k32 = find_module(std::process::id(), "kernel32.dll").unwrap();
        assert!(k32.contains(addr as usize));
    }

    #[test]
    fn test_failed_resolution_means_no_allocation() {
        let space = MemorySpace::Own;
        let template = CodeTemplate::new(Arch::X64, BLOB)
            .with_export(placeholders::SLOT_A, "kernel32.dll", "NoSuchExport5c1a");

        let err = inject(&space, &template);
        assert!(matches!(err, Err(GraftError::ExportNotFound { .. })));
    }

    #[test]
    fn test_missing_placeholder_means_no_allocation() {
        let space = MemorySpace::Own;
        // blob does not contain SLOT_B
        let template = CodeTemplate::new(Arch::X64, BLOB).with_address(placeholders::SLOT_B, 0x1000);

        let err = inject(&space, &template);
        assert!(matches!(err, Err(GraftError::PlaceholderMissing { .. })));
    }
}
