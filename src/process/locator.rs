//! PID lookup by image name or service name

use core::mem;

use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::Services::{
    CloseServiceHandle, OpenSCManagerW, OpenServiceW, QueryServiceStatusEx,
    SC_MANAGER_CONNECT, SC_STATUS_PROCESS_INFO, SERVICE_QUERY_STATUS, SERVICE_RUNNING,
    SERVICE_STATUS_PROCESS,
};

use crate::error::{GraftError, Result};

/// encode a &str as a null-terminated UTF-16 buffer
pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(core::iter::once(0)).collect()
}

/// decode a fixed null-terminated UTF-16 buffer
pub(crate) fn from_wide(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

/// one live process from a toolhelp snapshot
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// snapshot every live process
pub fn enumerate_processes() -> Result<Vec<ProcessEntry>> {
    // SAFETY: snapshot creation has no memory preconditions
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(GraftError::from_last_error("CreateToolhelp32Snapshot"));
    }

    let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

    let mut processes = Vec::new();
    // SAFETY: entry.dwSize is initialized and the snapshot handle is valid
    unsafe {
        if Process32FirstW(snapshot, &mut entry) != 0 {
            loop {
                processes.push(ProcessEntry {
                    pid: entry.th32ProcessID,
                    name: from_wide(&entry.szExeFile),
                });
                if Process32NextW(snapshot, &mut entry) == 0 {
                    break;
                }
            }
        }
        CloseHandle(snapshot);
    }
    Ok(processes)
}

/// find the first process whose image name matches (case-insensitive)
pub fn find_process_by_name(name: &str) -> Result<u32> {
    // SAFETY: snapshot creation has no memory preconditions
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(GraftError::from_last_error("CreateToolhelp32Snapshot"));
    }

    let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

    let mut pid = None;
    // SAFETY: entry.dwSize is initialized and the snapshot handle is valid
    unsafe {
        if Process32FirstW(snapshot, &mut entry) != 0 {
            loop {
                let image = from_wide(&entry.szExeFile);
                if image.eq_ignore_ascii_case(name) {
                    pid = Some(entry.th32ProcessID);
                    break;
                }
                if Process32NextW(snapshot, &mut entry) == 0 {
                    break;
                }
            }
        }
        CloseHandle(snapshot);
    }

    pid.ok_or_else(|| GraftError::ProcessNotFound {
        name: name.to_owned(),
    })
}

/// resolve the PID hosting a running service
pub fn find_service_process(service: &str) -> Result<u32> {
    let wide = to_wide(service);

    // SAFETY: null machine/database means the local active database
    let scm = unsafe { OpenSCManagerW(core::ptr::null(), core::ptr::null(), SC_MANAGER_CONNECT) };
    if scm.is_null() {
        return Err(GraftError::from_last_error("OpenSCManagerW"));
    }

    // SAFETY: scm is a valid manager handle, wide is null-terminated
    let handle = unsafe { OpenServiceW(scm, wide.as_ptr(), SERVICE_QUERY_STATUS) };
    if handle.is_null() {
        // SAFETY: scm is valid and only closed here
        unsafe { CloseServiceHandle(scm) };
        return Err(GraftError::ServiceNotFound {
            name: service.to_owned(),
        });
    }

    let mut status: SERVICE_STATUS_PROCESS = unsafe { mem::zeroed() };
    let mut needed = 0u32;
    // SAFETY: the status buffer is exactly the size QueryServiceStatusEx expects
    let ok = unsafe {
        QueryServiceStatusEx(
            handle,
            SC_STATUS_PROCESS_INFO,
            &mut status as *mut _ as *mut u8,
            mem::size_of::<SERVICE_STATUS_PROCESS>() as u32,
            &mut needed,
        )
    };
    // SAFETY: both handles are valid and closed exactly once
    unsafe {
        CloseServiceHandle(handle);
        CloseServiceHandle(scm);
    }

    if ok == 0 || status.dwCurrentState != SERVICE_RUNNING || status.dwProcessId == 0 {
        return Err(GraftError::ServiceNotFound {
            name: service.to_owned(),
        });
    }
    Ok(status.dwProcessId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_roundtrip() {
        let wide = to_wide("lsass.exe");
        assert_eq!(wide.last(), Some(&0));
        assert_eq!(from_wide(&wide), "lsass.exe");
    }

    #[test]
    fn test_enumerate_includes_self() {
        let all = enumerate_processes().unwrap();
        let me = std::process::id();
        assert!(all.iter().any(|p| p.pid == me));
    }

    #[test]
    fn test_find_unknown_process() {
        let err = find_process_by_name("definitely-not-a-process-5c1a.exe");
        assert!(matches!(err, Err(GraftError::ProcessNotFound { .. })));
    }

    #[test]
    fn test_find_unknown_service() {
        let err = find_service_process("definitely-not-a-service-5c1a");
        assert!(matches!(err, Err(GraftError::ServiceNotFound { .. })));
    }
}
