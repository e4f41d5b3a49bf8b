//! Address-space adapter for own-process and remote-process memory
//!
//! Every operation goes through the cross-process Win32 APIs with the
//! pseudo-handle standing in for the current process, so a bad address
//! fails with an error in both spaces instead of faulting in one of them.

use core::ffi::c_void;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows_sys::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, VirtualProtectEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentProcess, OpenProcess, PROCESS_CREATE_THREAD, PROCESS_QUERY_INFORMATION,
    PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
};

use crate::error::{GraftError, Result};

/// process access rights configuration
#[derive(Debug, Clone, Copy)]
pub struct ProcessAccess {
    pub rights: u32,
}

impl ProcessAccess {
    /// rights for reading, writing and executing in the target
    pub const fn full() -> Self {
        Self {
            rights: PROCESS_VM_READ
                | PROCESS_VM_WRITE
                | PROCESS_VM_OPERATION
                | PROCESS_QUERY_INFORMATION
                | PROCESS_CREATE_THREAD,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            rights: PROCESS_VM_READ
                | PROCESS_VM_WRITE
                | PROCESS_VM_OPERATION
                | PROCESS_QUERY_INFORMATION,
        }
    }

    pub const fn read_only() -> Self {
        Self {
            rights: PROCESS_VM_READ | PROCESS_QUERY_INFORMATION,
        }
    }

    pub const fn custom(rights: u32) -> Self {
        Self { rights }
    }
}

impl Default for ProcessAccess {
    fn default() -> Self {
        Self::full()
    }
}

/// owned handle to another process
pub struct RemoteProcess {
    handle: HANDLE,
    pid: u32,
    owns_handle: bool,
}

impl RemoteProcess {
    /// open a process by PID with specified access rights
    pub fn open(pid: u32, access: ProcessAccess) -> Result<Self> {
        // SAFETY: OpenProcess has no memory preconditions
        let handle = unsafe { OpenProcess(access.rights, 0, pid) };
        if handle.is_null() {
            let code = unsafe { windows_sys::Win32::Foundation::GetLastError() };
            return Err(GraftError::ProcessOpenFailed { pid, code });
        }

        Ok(Self {
            handle,
            pid,
            owns_handle: true,
        })
    }

    /// create from an existing handle (does not take ownership)
    ///
    /// # Safety
    /// caller must ensure handle is valid and has appropriate access rights
    pub unsafe fn from_handle(handle: HANDLE, pid: u32) -> Self {
        Self {
            handle,
            pid,
            owns_handle: false,
        }
    }

    /// create from an existing handle (takes ownership)
    ///
    /// # Safety
    /// caller must ensure handle is valid and has appropriate access rights
    pub unsafe fn from_handle_owned(handle: HANDLE, pid: u32) -> Self {
        Self {
            handle,
            pid,
            owns_handle: true,
        }
    }

    /// get the raw process handle
    pub fn handle(&self) -> HANDLE {
        self.handle
    }

    /// get the process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        if self.owns_handle && !self.handle.is_null() {
            // SAFETY: we own the handle and it is only closed here
            unsafe { CloseHandle(self.handle) };
        }
    }
}

// SAFETY: the handle is process-scoped, not thread-scoped
unsafe impl Send for RemoteProcess {}
unsafe impl Sync for RemoteProcess {}

/// an address space the engine can operate on
pub enum MemorySpace {
    /// the current process
    Own,
    /// another process, held open for the lifetime of the space
    Remote(RemoteProcess),
}

impl MemorySpace {
    /// open a remote process as a memory space
    pub fn open_remote(pid: u32) -> Result<Self> {
        Self::open_remote_with(pid, ProcessAccess::full())
    }

    /// open a remote process with explicit access rights
    pub fn open_remote_with(pid: u32, access: ProcessAccess) -> Result<Self> {
        Ok(Self::Remote(RemoteProcess::open(pid, access)?))
    }

    /// true if this space is another process
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// PID of the underlying process
    pub fn pid(&self) -> u32 {
        match self {
            Self::Own => std::process::id(),
            Self::Remote(p) => p.pid(),
        }
    }

    /// raw process handle for Win32 calls
    ///
    /// the pseudo-handle from GetCurrentProcess never needs closing
    pub fn raw_handle(&self) -> HANDLE {
        match self {
            // SAFETY: returns the -1 pseudo-handle, always valid
            Self::Own => unsafe { GetCurrentProcess() },
            Self::Remote(p) => p.handle(),
        }
    }

    /// an address within this space
    pub fn at(&self, addr: usize) -> Address<'_> {
        Address { space: self, addr }
    }

    /// a bounded range within this space
    pub fn range(&self, addr: usize, len: usize) -> Range<'_> {
        Range {
            base: self.at(addr),
            len,
        }
    }

    /// read exactly `buffer.len()` bytes at `address`
    pub fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let mut read = 0usize;
        // SAFETY: buffer is a valid local slice; a bad remote address makes
        // the call fail rather than fault
        let ok = unsafe {
            ReadProcessMemory(
                self.raw_handle(),
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                &mut read,
            )
        };
        if ok == 0 || read != buffer.len() {
            return Err(GraftError::ReadFailed {
                address: address as u64,
                size: buffer.len(),
            });
        }
        Ok(())
    }

    /// read a typed value at `address`
    pub fn read_value<T: Copy>(&self, address: usize) -> Result<T> {
        let mut buffer = vec![0u8; core::mem::size_of::<T>()];
        self.read(address, &mut buffer)?;
        // SAFETY: buffer is exactly size_of::<T> and fully initialized
        Ok(unsafe { (buffer.as_ptr() as *const T).read_unaligned() })
    }

    /// read `len` bytes at `address` into a new vector
    pub fn read_vec(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read(address, &mut buffer)?;
        Ok(buffer)
    }

    /// write all of `buffer` at `address`
    pub fn write(&self, address: usize, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let mut written = 0usize;
        // SAFETY: buffer is a valid local slice
        let ok = unsafe {
            WriteProcessMemory(
                self.raw_handle(),
                address as *const c_void,
                buffer.as_ptr() as *const c_void,
                buffer.len(),
                &mut written,
            )
        };
        if ok == 0 || written != buffer.len() {
            return Err(GraftError::WriteFailed {
                address: address as u64,
                size: buffer.len(),
            });
        }
        Ok(())
    }

    /// write a typed value at `address`
    pub fn write_value<T: Copy>(&self, address: usize, value: &T) -> Result<()> {
        // SAFETY: T is Copy and we only view its bytes
        let bytes = unsafe {
            core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>())
        };
        self.write(address, bytes)
    }

    /// allocate committed memory in this space
    pub fn allocate(&self, size: usize, protection: u32) -> Result<Allocation<'_>> {
        // SAFETY: a NULL base lets the system choose the address
        let base = unsafe {
            VirtualAllocEx(
                self.raw_handle(),
                core::ptr::null(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                protection,
            )
        };
        if base.is_null() {
            return Err(GraftError::AllocationFailed { size, protection });
        }
        tracing::trace!(pid = self.pid(), base = base as usize, size, "allocated");
        Ok(Allocation {
            space: self,
            base: base as usize,
            size,
            owns_memory: true,
        })
    }

    /// change protection, returning the previous protection
    pub fn protect(&self, address: usize, size: usize, protection: u32) -> Result<u32> {
        let mut old = 0u32;
        // SAFETY: old protection out-pointer is a valid local
        let ok = unsafe {
            VirtualProtectEx(self.raw_handle(), address as *const c_void, size, protection, &mut old)
        };
        if ok == 0 {
            return Err(GraftError::ProtectionChangeFailed {
                address: address as u64,
                size,
            });
        }
        Ok(old)
    }

    /// change protection with RAII guard that restores on drop
    pub fn protect_guard(
        &self,
        address: usize,
        size: usize,
        new_protection: u32,
    ) -> Result<ProtectionGuard<'_>> {
        let old_protection = self.protect(address, size, new_protection)?;
        Ok(ProtectionGuard {
            space: self,
            address,
            size,
            old_protection,
        })
    }

    /// free a previously allocated region
    pub fn free(&self, address: usize) -> Result<()> {
        // SAFETY: MEM_RELEASE with size 0 frees the whole allocation
        let ok = unsafe {
            VirtualFreeEx(self.raw_handle(), address as *mut c_void, 0, MEM_RELEASE)
        };
        if ok == 0 {
            return Err(GraftError::from_last_error("VirtualFreeEx"));
        }
        Ok(())
    }
}

/// copy `len` bytes between addresses in any two spaces
///
/// goes through a local bounce buffer, so source and destination may both
/// be remote (even in different processes)
pub fn copy(dst: Address<'_>, src: Address<'_>, len: usize) -> Result<()> {
    let mut bounce = vec![0u8; len];
    src.space.read(src.addr, &mut bounce)?;
    dst.space.write(dst.addr, &bounce)
}

/// an address bound to the space it belongs to
#[derive(Clone, Copy)]
pub struct Address<'s> {
    pub space: &'s MemorySpace,
    pub addr: usize,
}

impl<'s> Address<'s> {
    /// displace by a signed offset
    pub fn offset(self, delta: isize) -> Self {
        Self {
            space: self.space,
            addr: self.addr.wrapping_add_signed(delta),
        }
    }

    /// a range of `len` bytes starting here
    pub fn range(self, len: usize) -> Range<'s> {
        Range { base: self, len }
    }

    pub fn read(&self, buffer: &mut [u8]) -> Result<()> {
        self.space.read(self.addr, buffer)
    }

    pub fn read_value<T: Copy>(&self) -> Result<T> {
        self.space.read_value(self.addr)
    }

    pub fn write(&self, buffer: &[u8]) -> Result<()> {
        self.space.write(self.addr, buffer)
    }

    pub fn write_value<T: Copy>(&self, value: &T) -> Result<()> {
        self.space.write_value(self.addr, value)
    }
}

impl core::fmt::Debug for Address<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}@pid{}", self.addr, self.space.pid())
    }
}

/// a bounded byte range within one space
#[derive(Clone, Copy)]
pub struct Range<'s> {
    pub base: Address<'s>,
    pub len: usize,
}

impl<'s> Range<'s> {
    /// read the whole range into a vector
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        self.base.space.read_vec(self.base.addr, self.len)
    }

    /// true if `addr` falls inside this range
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base.addr && addr < self.base.addr + self.len
    }

    /// end address (exclusive)
    pub fn end(&self) -> usize {
        self.base.addr + self.len
    }
}

/// RAII wrapper for an allocation in some space
pub struct Allocation<'s> {
    space: &'s MemorySpace,
    base: usize,
    size: usize,
    owns_memory: bool,
}

impl<'s> Allocation<'s> {
    /// get the base address
    pub fn base(&self) -> usize {
        self.base
    }

    /// get the allocation size
    pub fn size(&self) -> usize {
        self.size
    }

    /// address of the allocation base
    pub fn address(&self) -> Address<'s> {
        self.space.at(self.base)
    }

    /// leak the allocation (don't free on drop)
    pub fn leak(mut self) -> usize {
        self.owns_memory = false;
        self.base
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        if self.owns_memory && self.base != 0 {
            let _ = self.space.free(self.base);
        }
    }
}

/// RAII guard for a protection change
pub struct ProtectionGuard<'s> {
    space: &'s MemorySpace,
    address: usize,
    size: usize,
    old_protection: u32,
}

impl ProtectionGuard<'_> {
    /// the protection that will be restored
    pub fn old_protection(&self) -> u32 {
        self.old_protection
    }
}

impl Drop for ProtectionGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .space
            .protect(self.address, self.size, self.old_protection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows_sys::Win32::System::Memory::PAGE_READWRITE;

    #[test]
    fn test_own_space_roundtrip() {
        let space = MemorySpace::Own;
        let data: Vec<u8> = (0u8..32).collect();
        let addr = data.as_ptr() as usize;

        let copy = space.read_vec(addr, data.len()).unwrap();
        assert_eq!(copy, data);
    }

    #[test]
    fn test_own_space_write() {
        let space = MemorySpace::Own;
        let mut data = vec![0u8; 8];
        let addr = data.as_mut_ptr() as usize;

        space.write(addr, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&data[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bad_address_fails_not_faults() {
        let space = MemorySpace::Own;
        let mut buf = [0u8; 16];
        let err = space.read(0x10, &mut buf);
        assert!(err.is_err());
    }

    #[test]
    fn test_allocate_and_free() {
        let space = MemorySpace::Own;
        let alloc = space.allocate(0x1000, PAGE_READWRITE).unwrap();
        space.write(alloc.base(), &[0xAA; 16]).unwrap();
        let back = space.read_vec(alloc.base(), 16).unwrap();
        assert_eq!(back, [0xAA; 16]);
    }

    #[test]
    fn test_open_self_as_remote() {
        let space = MemorySpace::open_remote(std::process::id()).unwrap();
        assert!(space.is_remote());

        let data = [0xDEu8, 0xAD, 0xBE, 0xEF];
        let copy = space.read_vec(data.as_ptr() as usize, 4).unwrap();
        assert_eq!(copy, data);
    }

    #[test]
    fn test_cross_space_copy() {
        let own = MemorySpace::Own;
        let src = [9u8, 8, 7, 6];
        let mut dst = [0u8; 4];
        copy(
            own.at(dst.as_mut_ptr() as usize),
            own.at(src.as_ptr() as usize),
            4,
        )
        .unwrap();
        assert_eq!(dst, src);
    }
}
