//! Loaded-module enumeration in a target process

use core::mem;

use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};

use crate::error::{GraftError, Result};
use crate::process::locator::from_wide;

/// one loaded module in a target process
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub path: String,
    pub base: usize,
    pub size: usize,
}

impl ModuleInfo {
    /// true if `addr` falls inside the module image
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// list all modules loaded in the process
pub fn enumerate_modules(pid: u32) -> Result<Vec<ModuleInfo>> {
    // SAFETY: snapshot creation has no memory preconditions
    let snapshot =
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(GraftError::from_last_error("CreateToolhelp32Snapshot"));
    }

    let mut entry: MODULEENTRY32W = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<MODULEENTRY32W>() as u32;

    let mut modules = Vec::new();
    // SAFETY: entry.dwSize is initialized and the snapshot handle is valid
    unsafe {
        if Module32FirstW(snapshot, &mut entry) != 0 {
            loop {
                modules.push(ModuleInfo {
                    name: from_wide(&entry.szModule),
                    path: from_wide(&entry.szExePath),
                    base: entry.modBaseAddr as usize,
                    size: entry.modBaseSize as usize,
                });
                if Module32NextW(snapshot, &mut entry) == 0 {
                    break;
                }
            }
        }
        CloseHandle(snapshot);
    }

    Ok(modules)
}

/// find a module by name (case-insensitive)
pub fn find_module(pid: u32, name: &str) -> Result<ModuleInfo> {
    enumerate_modules(pid)?
        .into_iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| GraftError::ModuleNotFound {
            name: name.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_own_modules() {
        let modules = enumerate_modules(std::process::id()).unwrap();
        assert!(!modules.is_empty());
        for m in &modules {
            assert!(m.base != 0);
            assert!(m.size > 0);
        }
    }

    #[test]
    fn test_find_kernel32() {
        let m = find_module(std::process::id(), "kernel32.dll").unwrap();
        assert!(m.contains(m.base));
        assert!(m.contains(m.base + m.size - 1));
        assert!(!m.contains(m.base + m.size));
    }

    #[test]
    fn test_find_missing_module() {
        let err = find_module(std::process::id(), "no-such-module-5c1a.dll");
        assert!(matches!(err, Err(GraftError::ModuleNotFound { .. })));
    }
}
