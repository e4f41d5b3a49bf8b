//! Architecture model and segment register access
//!
//! Patch tables and code templates are authored per target architecture,
//! and a 64-bit engine can operate on a 32-bit target (WOW64). Jump sizes
//! and pointer widths are therefore runtime values of [`Arch`], not
//! compile-time constants.

/// true if compiling for 64-bit
#[cfg(target_arch = "x86_64")]
pub const IS_64BIT: bool = true;

/// true if compiling for 64-bit
#[cfg(target_arch = "x86")]
pub const IS_64BIT: bool = false;

/// pointer size in bytes for current architecture
pub const PTR_SIZE: usize = core::mem::size_of::<usize>();

/// target instruction-set architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X64,
}

impl Arch {
    /// architecture this engine was compiled for
    pub const fn native() -> Self {
        if IS_64BIT {
            Self::X64
        } else {
            Self::X86
        }
    }

    /// pointer width in bytes on the target
    pub const fn pointer_width(self) -> usize {
        match self {
            Self::X86 => 4,
            Self::X64 => 8,
        }
    }

    /// length in bytes of an unconditional jump emitted by [`encode_jump`]
    ///
    /// [`encode_jump`]: Self::encode_jump
    pub const fn jump_len(self) -> usize {
        match self {
            // e9 rel32
            Self::X86 => 5,
            // ff 25 [rip+0] + absolute address
            Self::X64 => 14,
        }
    }

    /// encode an unconditional jump from `source` to `target`
    ///
    /// `source` is the address where the first byte of the jump will be
    /// written. On x86 this emits `e9 rel32` with the displacement taken
    /// from the end of the instruction; on x64 it emits a rip-relative
    /// indirect jump through an inline 8-byte absolute address, which
    /// reaches any target regardless of distance.
    pub fn encode_jump(self, source: u64, target: u64) -> Vec<u8> {
        match self {
            Self::X86 => {
                let mut code = Vec::with_capacity(5);
                code.push(0xE9);
                let rel = (target as u32).wrapping_sub(source as u32 + 5);
                code.extend_from_slice(&rel.to_le_bytes());
                code
            }
            Self::X64 => {
                let mut code = Vec::with_capacity(14);
                // jmp qword ptr [rip+0]
                code.extend_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
                code.extend_from_slice(&target.to_le_bytes());
                code
            }
        }
    }
}

/// x64 segment register access
#[cfg(target_arch = "x86_64")]
pub mod segment {
    use core::arch::asm;

    /// read 8 bytes from gs segment at given offset
    #[inline(always)]
    pub unsafe fn read_gs_qword(offset: u32) -> u64 {
        let value: u64;
        // SAFETY: caller ensures offset is valid within TEB
        unsafe {
            asm!(
                "mov {}, gs:[{:e}]",
                out(reg) value,
                in(reg) offset,
                options(nostack, preserves_flags, readonly)
            );
        }
        value
    }

    /// get pointer to current process's PEB
    ///
    /// on x64, PEB pointer is at gs:[0x60]
    #[inline(always)]
    pub unsafe fn get_peb() -> *mut u8 {
        // SAFETY: gs:[0x60] is always the PEB pointer on x64
        unsafe { read_gs_qword(0x60) as *mut u8 }
    }
}

/// x86 segment register access
#[cfg(target_arch = "x86")]
pub mod segment {
    use core::arch::asm;

    /// read 4 bytes from fs segment at given offset
    #[inline(always)]
    pub unsafe fn read_fs_dword(offset: u32) -> u32 {
        let value: u32;
        // SAFETY: caller ensures offset is valid within TEB
        unsafe {
            asm!(
                "mov {:e}, fs:[{:e}]",
                out(reg) value,
                in(reg) offset,
                options(nostack, preserves_flags, readonly)
            );
        }
        value
    }

    /// get pointer to current process's PEB
    ///
    /// on x86, PEB pointer is at fs:[0x30]
    #[inline(always)]
    pub unsafe fn get_peb() -> *mut u8 {
        // SAFETY: fs:[0x30] is always the PEB pointer on x86
        unsafe { read_fs_dword(0x30) as *mut u8 }
    }
}
