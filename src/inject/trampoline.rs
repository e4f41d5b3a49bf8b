//! Pointer patches and prologue splices
//!
//! Two hook shapes. A pointer patch overwrites a function-table slot with
//! the address of a grafted replacement. A prologue splice displaces the
//! first N bytes of the hooked function into a forwarder blob ending in a
//! jump back, then overwrites the prologue with a jump to the
//! replacement; N comes from the pattern table entry for the running
//! build, never from decoding instructions.

use windows_sys::Win32::System::Memory::PAGE_EXECUTE_READWRITE;

use crate::arch::Arch;
use crate::error::{GraftError, Result};
use crate::inject::engine::inject_with_refs;
use crate::inject::template::CodeTemplate;
use crate::memory::space::MemorySpace;
use crate::patch::apply::{write_at, PatchBackup};

/// a committed prologue splice
///
/// the forwarder and replacement blobs are permanent; only the prologue
/// overwrite is reversible, through `prologue`
pub struct SpliceHook {
    pub hook_point: usize,
    pub forwarder: usize,
    pub replacement: usize,
    pub prologue: PatchBackup,
}

/// overwrite a pointer-width slot with `target`
pub fn patch_pointer(
    space: &MemorySpace,
    arch: Arch,
    slot: usize,
    target: usize,
) -> Result<PatchBackup> {
    let bytes = &(target as u64).to_le_bytes()[..arch.pointer_width()];
    let backup = write_at(space, slot, bytes)?;
    tracing::info!(slot, target, pid = space.pid(), "pointer slot patched");
    Ok(backup)
}

/// splice `replacement` over the function prologue at `hook_point`
///
/// `displaced_len` bytes are preserved in a forwarder blob that ends in a
/// jump back to `hook_point + displaced_len`; if the template names a
/// placeholder in `original_path`, it is resolved to the forwarder so the
/// replacement can invoke the original function. The prologue overwrite
/// is the last remote mutation: every allocation and resolution happens
/// first, so a failure before it leaves the hooked function running
/// untouched.
pub fn splice<'s>(
    space: &'s MemorySpace,
    arch: Arch,
    hook_point: usize,
    displaced_len: usize,
    replacement: &CodeTemplate,
    original_path: Option<u64>,
) -> Result<SpliceHook> {
    let jump_len = arch.jump_len();
    if displaced_len < jump_len {
        return Err(GraftError::SpliceTooShort {
            needed: jump_len,
            available: displaced_len,
        });
    }

    let displaced = space.read_vec(hook_point, displaced_len)?;

    // the forwarder is allocated before its jump is encoded so a relative
    // displacement can be computed from its real address
    let forwarder = space.allocate(displaced_len + jump_len, PAGE_EXECUTE_READWRITE)?;
    let mut blob = displaced;
    blob.extend_from_slice(&arch.encode_jump(
        (forwarder.base() + displaced_len) as u64,
        (hook_point + displaced_len) as u64,
    ));
    space.write(forwarder.base(), &blob)?;

    let extra: Vec<(u64, usize)> = original_path
        .map(|p| (p, forwarder.base()))
        .into_iter()
        .collect();
    let replacement_alloc = inject_with_refs(space, replacement, &extra)?;

    let detour = arch.encode_jump(hook_point as u64, replacement_alloc.base() as u64);
    let prologue = write_at(space, hook_point, &detour)?;
    tracing::info!(
        hook_point,
        replacement = replacement_alloc.base(),
        forwarder = forwarder.base(),
        pid = space.pid(),
        "prologue spliced"
    );

    Ok(SpliceHook {
        hook_point,
        forwarder: forwarder.leak(),
        replacement: replacement_alloc.leak(),
        prologue,
    })
}
