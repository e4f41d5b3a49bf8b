//! Route-monitoring suppression for Juniper Network Connect
//!
//! The VPN client's service refuses to establish a tunnel when the local
//! routing table changes under it. Replacing the conditional jump after
//! the route check with nops keeps the tunnel alive. The signature is
//! stable across every shipped release, so a single XP-floor entry covers
//! the table.

use crate::commands::Session;
use crate::error::{GraftError, Result};
use crate::memory::space::MemorySpace;
use crate::patch::apply::apply_for_build;
use crate::patch::table::{PatchEntry, PatchTable};
use crate::process::locator::find_service_process;
use crate::process::modules::enumerate_modules;
use crate::version::builds;

const VPN_SERVICE: &str = "dsNcService";

const ROUTE_CHECK: PatchTable = PatchTable {
    context: "route monitor check",
    entries: &[PatchEntry {
        min_build: builds::XP,
        search: &[0x07, 0x00, 0x75, 0x3A, 0x68],
        replace: &[0x90, 0x90],
        patch_offset: 2,
        aux_offset: 0,
    }],
};

/// nop out the route-monitor bailout in the running service
///
/// the patch site lives in the service's main image, which toolhelp
/// reports as the first module of the snapshot
pub fn disable(session: &Session) -> Result<usize> {
    let pid = find_service_process(VPN_SERVICE)?;
    let space = MemorySpace::open_remote(pid)?;
    let main = enumerate_modules(pid)?
        .into_iter()
        .next()
        .ok_or(GraftError::ModuleNotFound {
            name: VPN_SERVICE.to_owned(),
        })?;

    let address = apply_for_build(
        space.range(main.base, main.size),
        &ROUTE_CHECK,
        session.build,
    )?;
    tracing::info!(pid, address, module = %main.name, "route monitoring disabled");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_entry_covers_all_builds() {
        for build in [builds::XP, builds::WIN_7_SP1, builds::WIN_10_1809] {
            let e = ROUTE_CHECK.select(build).unwrap();
            assert_eq!(e.replace, &[0x90, 0x90]);
            assert_eq!(e.patch_offset, 2);
        }
    }

    #[test]
    fn test_patch_lands_on_conditional_jump() {
        // offset 2 into the signature is the 75 3a jump being nopped
        let e = ROUTE_CHECK.entries[0];
        let site = &e.search[e.patch_offset as usize..][..2];
        assert_eq!(site, &[0x75, 0x3A]);
    }

    #[test]
    fn test_missing_service() {
        let s = Session::with(builds::WIN_10_1809, crate::arch::Arch::native());
        assert!(matches!(
            disable(&s),
            Err(GraftError::ServiceNotFound { .. })
        ));
    }
}
