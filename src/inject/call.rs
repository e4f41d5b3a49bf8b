//! Synchronous invocation of grafted code
//!
//! The injected routine receives one pointer to a parameter block laid
//! out as {input pointer, input length: u32, status: u32, output payload,
//! input payload} at the target's pointer width, and mirrors its return
//! status into the block before the thread exits.

use core::ffi::c_void;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Memory::PAGE_READWRITE;
use windows_sys::Win32::System::Threading::{CreateRemoteThread, WaitForSingleObject, INFINITE};

use crate::arch::Arch;
use crate::error::{GraftError, Result};
use crate::memory::space::MemorySpace;

/// result of one remote call
#[derive(Debug)]
pub struct RemoteCallOutput {
    /// status mirrored into the block by the injected routine
    pub status: u32,
    /// output payload copied back from the block
    pub payload: Vec<u8>,
}

/// run the routine at `code_address` in the target on its own thread
///
/// blocks until the thread finishes; `timeout` of `None` waits forever,
/// matching the callers that rely on the block being fully populated
/// before it is read back. On timeout the parameter block is leaked,
/// since the remote thread may still write to it.
pub fn call(
    space: &MemorySpace,
    arch: Arch,
    code_address: usize,
    input: &[u8],
    output_len: usize,
    timeout: Option<Duration>,
) -> Result<RemoteCallOutput> {
    let ptr_width = arch.pointer_width();
    let header_len = ptr_width + 8;
    let status_offset = ptr_width + 4;
    let total = header_len + output_len + input.len();

    let block = space.allocate(total, PAGE_READWRITE)?;
    let input_remote = block.base() + header_len + output_len;

    let mut local = Vec::with_capacity(total);
    local.extend_from_slice(&(input_remote as u64).to_le_bytes()[..ptr_width]);
    local.extend_from_slice(&(input.len() as u32).to_le_bytes());
    local.extend_from_slice(&0u32.to_le_bytes());
    local.resize(header_len + output_len, 0);
    local.extend_from_slice(input);
    space.write(block.base(), &local)?;

    // SAFETY: code_address points at a grafted routine with the thread
    // entry signature; the block outlives the wait
    let thread = unsafe {
        CreateRemoteThread(
            space.raw_handle(),
            core::ptr::null(),
            0,
            Some(core::mem::transmute::<
                usize,
                unsafe extern "system" fn(*mut c_void) -> u32,
            >(code_address)),
            block.base() as *const c_void,
            0,
            core::ptr::null_mut(),
        )
    };
    if thread.is_null() {
        let code = unsafe { windows_sys::Win32::Foundation::GetLastError() };
        return Err(GraftError::RemoteThreadFailed { code });
    }

    let wait_ms = timeout.map_or(INFINITE, |d| d.as_millis().min(u128::from(u32::MAX - 1)) as u32);
    // SAFETY: thread is a valid handle we own
    let waited = unsafe { WaitForSingleObject(thread, wait_ms) };
    unsafe { CloseHandle(thread) };

    match waited {
        WAIT_OBJECT_0 => {}
        WAIT_TIMEOUT => {
            // the routine may still be running and writing into the block
            block.leak();
            return Err(GraftError::WaitTimedOut);
        }
        _ => return Err(GraftError::from_last_error("WaitForSingleObject")),
    }

    let status: u32 = space.read_value(block.base() + status_offset)?;
    let payload = space.read_vec(block.base() + header_len, output_len)?;
    tracing::debug!(pid = space.pid(), status, "remote call returned");
    Ok(RemoteCallOutput { status, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::engine::inject;
    use crate::inject::template::CodeTemplate;

    // mov dword ptr [rcx+0xC], 0x11223344 ; mov eax, 0x11223344 ; ret
    #[cfg(target_arch = "x86_64")]
    const FIXED_STATUS: &[u8] = &[
        0xC7, 0x41, 0x0C, 0x44, 0x33, 0x22, 0x11, // mov [rcx+12], imm32
        0xB8, 0x44, 0x33, 0x22, 0x11, // mov eax, imm32
        0xC3,
    ];

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_self_call_fixed_status() {
        let space = MemorySpace::Own;
        let template = CodeTemplate::new(Arch::X64, FIXED_STATUS);
        let alloc = inject(&space, &template).unwrap();

        let out = call(&space, Arch::X64, alloc.base(), &[], 0, None).unwrap();
        assert_eq!(out.status, 0x1122_3344);
        assert!(out.payload.is_empty());
    }

    // mov rax, [rcx] ; mov edx, [rax] ; mov [rcx+0x10], edx ;
    // mov dword ptr [rcx+0xC], 0 ; xor eax, eax ; ret
    #[cfg(target_arch = "x86_64")]
    const ECHO_FIRST_DWORD: &[u8] = &[
        0x48, 0x8B, 0x01, // mov rax, [rcx]
        0x8B, 0x10, // mov edx, [rax]
        0x89, 0x51, 0x10, // mov [rcx+0x10], edx
        0xC7, 0x41, 0x0C, 0x00, 0x00, 0x00, 0x00, // mov [rcx+0xC], 0
        0x31, 0xC0, // xor eax, eax
        0xC3,
    ];

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_self_call_input_to_payload() {
        let space = MemorySpace::Own;
        let template = CodeTemplate::new(Arch::X64, ECHO_FIRST_DWORD);
        let alloc = inject(&space, &template).unwrap();

        let input = 0xCAFE_F00Du32.to_le_bytes();
        let out = call(&space, Arch::X64, alloc.base(), &input, 4, None).unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.payload, input);
    }
}
