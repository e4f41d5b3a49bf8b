//! Windows version detection
//!
//! Pattern tables gate on raw build numbers, so the version model here is
//! deliberately thin: read major/minor/build out of the PEB and expose the
//! build floors the tables reference.

use crate::arch::segment;
use crate::error::{GraftError, Result};
use core::cmp::Ordering;

/// build numbers used as pattern-table floors
pub mod builds {
    pub const XP: u32 = 2600;
    pub const SERVER_2K3: u32 = 3790;
    pub const VISTA: u32 = 6000;
    pub const WIN_7: u32 = 7600;
    pub const WIN_7_SP1: u32 = 7601;
    pub const WIN_8: u32 = 9200;
    pub const WIN_BLUE: u32 = 9600;
    pub const WIN_10_1507: u32 = 10240;
    pub const WIN_10_1511: u32 = 10586;
    pub const WIN_10_1607: u32 = 14393;
    pub const WIN_10_1703: u32 = 15063;
    pub const WIN_10_1709: u32 = 16299;
    pub const WIN_10_1803: u32 = 17134;
    pub const WIN_10_1809: u32 = 17763;
}

/// represents a specific Windows version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl WindowsVersion {
    /// get current Windows version from PEB
    ///
    /// reads OSMajorVersion, OSMinorVersion, OSBuildNumber from PEB
    pub fn current() -> Result<Self> {
        // SAFETY: segment::get_peb returns valid PEB pointer for current process
        let peb = unsafe { segment::get_peb() };
        if peb.is_null() {
            return Err(GraftError::InvalidPebAccess);
        }

        // offsets are consistent across all Windows versions for these fields
        // x64: OSMajorVersion @ 0x118, OSMinorVersion @ 0x11C, OSBuildNumber @ 0x120
        // x86: OSMajorVersion @ 0xA4, OSMinorVersion @ 0xA8, OSBuildNumber @ 0xAC

        #[cfg(target_arch = "x86_64")]
        let (major, minor, build) = unsafe {
            let major = (peb.add(0x118) as *const u32).read_unaligned();
            let minor = (peb.add(0x11C) as *const u32).read_unaligned();
            let build = (peb.add(0x120) as *const u16).read_unaligned() as u32;
            (major, minor, build)
        };

        #[cfg(target_arch = "x86")]
        let (major, minor, build) = unsafe {
            let major = (peb.add(0xA4) as *const u32).read_unaligned();
            let minor = (peb.add(0xA8) as *const u32).read_unaligned();
            let build = (peb.add(0xAC) as *const u16).read_unaligned() as u32;
            (major, minor, build)
        };

        Ok(Self { major, minor, build })
    }
}

impl PartialOrd for WindowsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WindowsVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => match self.minor.cmp(&other.minor) {
                Ordering::Equal => self.build.cmp(&other.build),
                ord => ord,
            },
            ord => ord,
        }
    }
}

impl core::fmt::Display for WindowsVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version_sane() {
        let v = WindowsVersion::current().unwrap();
        assert!(v.major >= 6);
        assert!(v.build >= builds::VISTA);
    }

    #[test]
    fn test_version_comparison() {
        let a = WindowsVersion { major: 10, minor: 0, build: 17134 };
        let b = WindowsVersion { major: 10, minor: 0, build: 17763 };
        assert!(a < b);
        let old = WindowsVersion { major: 6, minor: 1, build: 7601 };
        assert!(old < a);
    }
}
