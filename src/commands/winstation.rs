//! Session lock and wallpaper change through a proxy process
//!
//! `LockWorkStation` and `SystemParametersInfoW` only act on the window
//! station of the calling process, so both operations graft a small
//! routine into a process already attached to the interactive session
//! (explorer by default) and invoke it there. The routine mirrors
//! `GetLastError` into the parameter-block status field on failure.

use std::time::Duration;

use crate::arch::Arch;
use crate::commands::Session;
use crate::error::{GraftError, Result};
use crate::inject::call::{call, RemoteCallOutput};
use crate::inject::engine::inject;
use crate::inject::template::{placeholders, CodeTemplate};
use crate::memory::space::{Allocation, MemorySpace};
use crate::process::locator::{find_process_by_name, to_wide};

const DEFAULT_PROXY: &str = "explorer.exe";

// SLOT_A = user32!LockWorkStation, SLOT_B = kernel32!GetLastError
const LOCK_X64: &[u8] = &[
    0x48, 0x89, 0x5C, 0x24, 0x08, // mov [rsp+8], rbx
    0x48, 0x83, 0xEC, 0x20, // sub rsp, 0x20
    0x48, 0x8B, 0xD9, // mov rbx, rcx
    0xC7, 0x41, 0x0C, 0x00, 0x00, 0x00, 0x00, // mov dword [rcx+0xC], 0
    0x48, 0xB8, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, // mov rax, LockWorkStation
    0xFF, 0xD0, // call rax
    0x85, 0xC0, // test eax, eax
    0x75, 0x0F, // jnz done
    0x48, 0xB8, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, // mov rax, GetLastError
    0xFF, 0xD0, // call rax
    0x89, 0x43, 0x0C, // mov [rbx+0xC], eax
    // done:
    0x33, 0xC0, // xor eax, eax
    0x48, 0x8B, 0x5C, 0x24, 0x30, // mov rbx, [rsp+0x30]
    0x48, 0x83, 0xC4, 0x20, // add rsp, 0x20
    0xC3, // ret
];

const LOCK_X86: &[u8] = &[
    0x55, // push ebp
    0x8B, 0xEC, // mov ebp, esp
    0x56, // push esi
    0x8B, 0x75, 0x08, // mov esi, [ebp+8]
    0xC7, 0x46, 0x08, 0x00, 0x00, 0x00, 0x00, // mov dword [esi+8], 0
    0xB8, 0x41, 0x41, 0x41, 0x41, // mov eax, LockWorkStation
    0xFF, 0xD0, // call eax
    0x85, 0xC0, // test eax, eax
    0x75, 0x0A, // jnz done
    0xB8, 0x42, 0x42, 0x42, 0x42, // mov eax, GetLastError
    0xFF, 0xD0, // call eax
    0x89, 0x46, 0x08, // mov [esi+8], eax
    // done:
    0x33, 0xC0, // xor eax, eax
    0x5E, // pop esi
    0x5D, // pop ebp
    0xC2, 0x04, 0x00, // ret 4
];

// SystemParametersInfoW(SPI_SETDESKWALLPAPER, 0, path, UPDATEINIFILE | SENDCHANGE)
// with the path taken from the parameter block's input pointer.
// SLOT_A = user32!SystemParametersInfoW, SLOT_B = kernel32!GetLastError
const WALLPAPER_X64: &[u8] = &[
    0x48, 0x89, 0x5C, 0x24, 0x08, // mov [rsp+8], rbx
    0x48, 0x83, 0xEC, 0x20, // sub rsp, 0x20
    0x48, 0x8B, 0xD9, // mov rbx, rcx
    0xC7, 0x41, 0x0C, 0x00, 0x00, 0x00, 0x00, // mov dword [rcx+0xC], 0
    0x4C, 0x8B, 0x01, // mov r8, [rcx] (input = wide path)
    0xB9, 0x14, 0x00, 0x00, 0x00, // mov ecx, SPI_SETDESKWALLPAPER
    0x33, 0xD2, // xor edx, edx
    0x41, 0xB9, 0x03, 0x00, 0x00, 0x00, // mov r9d, 3
    0x48, 0xB8, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, // mov rax, SystemParametersInfoW
    0xFF, 0xD0, // call rax
    0x85, 0xC0, // test eax, eax
    0x75, 0x0F, // jnz done
    0x48, 0xB8, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, // mov rax, GetLastError
    0xFF, 0xD0, // call rax
    0x89, 0x43, 0x0C, // mov [rbx+0xC], eax
    // done:
    0x33, 0xC0, // xor eax, eax
    0x48, 0x8B, 0x5C, 0x24, 0x30, // mov rbx, [rsp+0x30]
    0x48, 0x83, 0xC4, 0x20, // add rsp, 0x20
    0xC3, // ret
];

const WALLPAPER_X86: &[u8] = &[
    0x55, // push ebp
    0x8B, 0xEC, // mov ebp, esp
    0x56, // push esi
    0x8B, 0x75, 0x08, // mov esi, [ebp+8]
    0xC7, 0x46, 0x08, 0x00, 0x00, 0x00, 0x00, // mov dword [esi+8], 0
    0x6A, 0x03, // push 3
    0xFF, 0x36, // push dword [esi] (input = wide path)
    0x6A, 0x00, // push 0
    0x6A, 0x14, // push SPI_SETDESKWALLPAPER
    0xB8, 0x41, 0x41, 0x41, 0x41, // mov eax, SystemParametersInfoW
    0xFF, 0xD0, // call eax
    0x85, 0xC0, // test eax, eax
    0x75, 0x0A, // jnz done
    0xB8, 0x42, 0x42, 0x42, 0x42, // mov eax, GetLastError
    0xFF, 0xD0, // call eax
    0x89, 0x46, 0x08, // mov [esi+8], eax
    // done:
    0x33, 0xC0, // xor eax, eax
    0x5E, // pop esi
    0x5D, // pop ebp
    0xC2, 0x04, 0x00, // ret 4
];

/// invoke a grafted routine, abandoning its code region if the wait
/// times out
///
/// the remote thread may still be executing inside the region on a
/// timeout, so freeing it would crash the proxy; every other error
/// path drops (and frees) the allocation normally
fn call_abandoning_on_timeout(
    space: &MemorySpace,
    arch: Arch,
    blob: Allocation<'_>,
    input: &[u8],
    timeout: Duration,
) -> Result<RemoteCallOutput> {
    match call(space, arch, blob.base(), input, 0, Some(timeout)) {
        Err(e) => {
            if matches!(e, GraftError::WaitTimedOut) {
                blob.leak();
            }
            Err(e)
        }
        Ok(out) => Ok(out),
    }
}

fn run_in_proxy(
    session: &Session,
    proxy: Option<&str>,
    template: CodeTemplate,
    input: &[u8],
    context: &'static str,
) -> Result<()> {
    let pid = find_process_by_name(proxy.unwrap_or(DEFAULT_PROXY))?;
    let space = MemorySpace::open_remote(pid)?;

    let blob = inject(&space, &template)?;
    let out = call_abandoning_on_timeout(
        &space,
        session.arch,
        blob,
        input,
        Duration::from_secs(30),
    )?;
    // blob freed when the allocation dropped inside the call helper

    if out.status != 0 {
        return Err(GraftError::Win32Error {
            code: out.status,
            context,
        });
    }
    tracing::info!(pid, context, "proxy call succeeded");
    Ok(())
}

/// lock the interactive session from inside `proxy` (explorer by default)
pub fn lock(session: &Session, proxy: Option<&str>) -> Result<()> {
    let code = match session.arch {
        Arch::X86 => LOCK_X86,
        Arch::X64 => LOCK_X64,
    };
    let template = CodeTemplate::new(session.arch, code)
        .with_export(placeholders::SLOT_A, "user32.dll", "LockWorkStation")
        .with_export(placeholders::SLOT_B, "kernel32.dll", "GetLastError");
    run_in_proxy(session, proxy, template, &[], "LockWorkStation")
}

/// change the desktop wallpaper from inside `proxy`
pub fn set_wallpaper(session: &Session, path: &str, proxy: Option<&str>) -> Result<()> {
    let code = match session.arch {
        Arch::X86 => WALLPAPER_X86,
        Arch::X64 => WALLPAPER_X64,
    };
    let template = CodeTemplate::new(session.arch, code)
        .with_export(placeholders::SLOT_A, "user32.dll", "SystemParametersInfoW")
        .with_export(placeholders::SLOT_B, "kernel32.dll", "GetLastError");

    let wide = to_wide(path);
    let input: Vec<u8> = wide.iter().flat_map(|c| c.to_le_bytes()).collect();
    run_in_proxy(session, proxy, template, &input, "SystemParametersInfoW")
}
