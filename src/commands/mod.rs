//! Feature clients built on the patch and graft engine
//!
//! - `credlog`: authentication-path splice that logs credential material
//! - `skeleton`: kerberos skeleton-key install in the LSA process
//! - `winstation`: session lock and wallpaper change through a proxy process
//! - `ntlmchall`: fixed NTLM challenge patch in the authentication package
//! - `nogpo`: per-process policy-string flip at suspended start
//! - `routemon`: route-monitoring prompt suppression in its service process
//! - `detours`: export redirect survey across all reachable processes

pub mod credlog;
pub mod detours;
pub mod nogpo;
pub mod ntlmchall;
pub mod routemon;
pub mod skeleton;
pub mod winstation;

use crate::arch::Arch;
use crate::error::Result;
use crate::version::WindowsVersion;

/// ambient facts every command keys its decisions on
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// OS build number, selects pattern-table entries
    pub build: u32,
    /// architecture of the processes being operated on
    pub arch: Arch,
}

impl Session {
    /// capture the running system
    pub fn current() -> Result<Self> {
        Ok(Self {
            build: WindowsVersion::current()?.build,
            arch: Arch::native(),
        })
    }

    /// explicit build and architecture, for table selection off-box
    pub fn with(build: u32, arch: Arch) -> Self {
        Self { build, arch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::builds;

    #[test]
    fn test_current_session() {
        let s = Session::current().unwrap();
        assert!(s.build >= builds::VISTA);
        assert_eq!(s.arch, Arch::native());
    }

    #[test]
    fn test_explicit_session() {
        let s = Session::with(builds::WIN_10_1809, Arch::X86);
        assert_eq!(s.build, 17763);
        assert_eq!(s.arch, Arch::X86);
    }
}
