//! Redirect walker over exported entry points
//!
//! Starts at an export's first instruction and follows unconditional
//! control transfers until no known redirect pattern matches, counting
//! how many hops leave the owning module. A clean export terminates
//! immediately; a detoured one walks through one or more foreign blobs.

use crate::arch::Arch;
use crate::error::Result;
use crate::memory::space::MemorySpace;
use crate::process::exports::enumerate_exports;
use crate::process::modules::ModuleInfo;

/// longest chain followed before giving up
const MAX_DEPTH: usize = 8;

/// bytes decoded per step
const PROBE_LEN: usize = 16;

/// redirect instruction forms recognized by the walker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// e9 rel32
    RelativeJump,
    /// ff 25, destination read through a pointer
    IndirectJump,
    /// 50 48 b8 imm64, push/mov-immediate prologue
    PushMovImmediate,
}

impl RedirectKind {
    /// indirect jumps are normal at level 0 (import thunks, API sets);
    /// they only count as a redirect once the walk has already left the
    /// owning module
    fn min_level(self) -> usize {
        match self {
            Self::IndirectJump => 1,
            Self::RelativeJump | Self::PushMovImmediate => 0,
        }
    }
}

/// one followed control transfer
#[derive(Debug, Clone, Copy)]
pub struct Redirect {
    pub from: usize,
    pub to: usize,
    pub kind: RedirectKind,
    /// true if `to` is outside the owning module
    pub leaves_module: bool,
}

/// walk result for one export
#[derive(Debug, Clone)]
pub struct HookReport {
    pub module: String,
    pub export: String,
    pub export_address: usize,
    pub chain: Vec<Redirect>,
}

impl HookReport {
    /// number of hops that left the owning module
    pub fn hook_level(&self) -> usize {
        self.chain.iter().filter(|r| r.leaves_module).count()
    }
}

/// decode a redirect at `probe[0..]`, returning kind and destination
fn decode_redirect(
    space: &MemorySpace,
    arch: Arch,
    addr: usize,
    probe: &[u8],
) -> Option<(RedirectKind, usize)> {
    match probe {
        [0xE9, ..] if probe.len() >= 5 => {
            let rel = i32::from_le_bytes([probe[1], probe[2], probe[3], probe[4]]);
            let to = (addr as u64)
                .wrapping_add(5)
                .wrapping_add_signed(rel as i64) as usize;
            Some((RedirectKind::RelativeJump, to))
        }
        [0xFF, 0x25, ..] if probe.len() >= 6 => {
            let disp = i32::from_le_bytes([probe[2], probe[3], probe[4], probe[5]]);
            let slot = match arch {
                // rip-relative displacement from the end of the instruction
                Arch::X64 => (addr as u64).wrapping_add(6).wrapping_add_signed(disp as i64) as usize,
                // literal pointer operand
                Arch::X86 => disp as u32 as usize,
            };
            let to = match arch {
                Arch::X64 => space.read_value::<u64>(slot).ok()? as usize,
                Arch::X86 => space.read_value::<u32>(slot).ok()? as usize,
            };
            Some((RedirectKind::IndirectJump, to))
        }
        [0x50, 0x48, 0xB8, ..] if arch == Arch::X64 && probe.len() >= 11 => {
            let imm = u64::from_le_bytes(probe[3..11].try_into().ok()?);
            Some((RedirectKind::PushMovImmediate, imm as usize))
        }
        _ => None,
    }
}

/// follow redirects from `start`, bounded by [`MAX_DEPTH`]
///
/// read failures along the chain terminate the walk rather than failing
/// it; a destination may legitimately be unreadable
pub fn walk_redirects(
    space: &MemorySpace,
    arch: Arch,
    start: usize,
    owner: &ModuleInfo,
) -> Vec<Redirect> {
    let mut chain = Vec::new();
    let mut addr = start;
    let mut level = 0usize;
    let mut probe = [0u8; PROBE_LEN];

    for _ in 0..MAX_DEPTH {
        if space.read(addr, &mut probe).is_err() {
            break;
        }
        let Some((kind, to)) = decode_redirect(space, arch, addr, &probe) else {
            break;
        };
        if kind.min_level() > level || to == 0 {
            break;
        }
        let leaves_module = !owner.contains(to);
        if leaves_module {
            level += 1;
        }
        chain.push(Redirect {
            from: addr,
            to,
            kind,
            leaves_module,
        });
        addr = to;
    }

    chain
}

/// walk every named export of `module`, reporting those whose entry
/// chain escapes the module
pub fn scan_module(
    space: &MemorySpace,
    arch: Arch,
    module: &ModuleInfo,
) -> Result<Vec<HookReport>> {
    let mut reports = Vec::new();
    for export in enumerate_exports(space, module.base)? {
        let chain = walk_redirects(space, arch, export.address, module);
        if chain.iter().any(|r| r.leaves_module) {
            tracing::debug!(
                module = %module.name,
                export = %export.name,
                hops = chain.len(),
                "redirected export"
            );
            reports.push(HookReport {
                module: module.name.clone(),
                export: export.name,
                export_address: export.address,
                chain,
            });
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_module(base: usize, size: usize) -> ModuleInfo {
        ModuleInfo {
            name: "fake.dll".into(),
            path: String::new(),
            base,
            size,
        }
    }

    #[test]
    fn test_relative_jump_decode() {
        let space = MemorySpace::Own;
        // jmp +0x100 from a buffer address
        let mut code = [0u8; 16];
        code[0] = 0xE9;
        code[1..5].copy_from_slice(&0x100u32.to_le_bytes());
        let addr = code.as_ptr() as usize;

        let (kind, to) = decode_redirect(&space, Arch::X64, addr, &code).unwrap();
        assert_eq!(kind, RedirectKind::RelativeJump);
        assert_eq!(to, addr + 5 + 0x100);
    }

    #[test]
    fn test_indirect_jump_reads_pointer() {
        let space = MemorySpace::Own;
        let target: u64 = 0x7FF0_1234_5678;
        let slot = &target as *const u64 as usize;

        let mut code = [0u8; 16];
        code[0] = 0xFF;
        code[1] = 0x25;
        let addr = code.as_ptr() as usize;
        let disp = (slot as i64 - (addr as i64 + 6)) as i32;
        code[2..6].copy_from_slice(&disp.to_le_bytes());

        let (kind, to) = decode_redirect(&space, Arch::X64, addr, &code).unwrap();
        assert_eq!(kind, RedirectKind::IndirectJump);
        assert_eq!(to, target as usize);
    }

    #[test]
    fn test_push_mov_immediate_decode() {
        let space = MemorySpace::Own;
        let mut code = [0u8; 16];
        code[0] = 0x50;
        code[1] = 0x48;
        code[2] = 0xB8;
        code[3..11].copy_from_slice(&0x7FF0_AABB_CCDDu64.to_le_bytes());

        let (kind, to) =
            decode_redirect(&space, Arch::X64, code.as_ptr() as usize, &code).unwrap();
        assert_eq!(kind, RedirectKind::PushMovImmediate);
        assert_eq!(to, 0x7FF0_AABB_CCDD);
    }

    #[test]
    fn test_walk_counts_escape() {
        let space = MemorySpace::Own;
        // hook point jumps to a foreign blob that just returns
        let blob = [0xC3u8; 16];
        let mut code = [0u8; 16];
        code[0] = 0xE9;
        let addr = code.as_ptr() as usize;
        let rel = (blob.as_ptr() as i64 - (addr as i64 + 5)) as i32;
        code[1..5].copy_from_slice(&rel.to_le_bytes());

        let owner = fake_module(addr, 16);
        let chain = walk_redirects(&space, Arch::X64, addr, &owner);
        assert_eq!(chain.len(), 1);
        assert!(chain[0].leaves_module);
        assert_eq!(chain[0].to, blob.as_ptr() as usize);
    }

    #[test]
    fn test_indirect_not_followed_at_level_zero() {
        let space = MemorySpace::Own;
        let target: u64 = 0x1000;
        let slot = &target as *const u64 as usize;

        let mut code = [0u8; 16];
        code[0] = 0xFF;
        code[1] = 0x25;
        let addr = code.as_ptr() as usize;
        let disp = (slot as i64 - (addr as i64 + 6)) as i32;
        code[2..6].copy_from_slice(&disp.to_le_bytes());

        let owner = fake_module(addr, 16);
        let chain = walk_redirects(&space, Arch::X64, addr, &owner);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_plain_code_is_clean() {
        let space = MemorySpace::Own;
        let code = [0x48u8, 0x89, 0x5C, 0x24, 0x08, 0xC3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let owner = fake_module(code.as_ptr() as usize, 16);
        let chain = walk_redirects(&space, Arch::X64, code.as_ptr() as usize, &owner);
        assert!(chain.is_empty());
    }
}
