//! Relocatable code blobs with placeholder constants
//!
//! A template is position-independent machine code whose only external
//! dependencies are pointer-width constants embedded literally in the
//! instruction stream. The constants are chosen to be implausible as real
//! code or data, so they can be located by exact byte match and rewritten
//! with resolved addresses before the blob is committed to a target.

use crate::arch::Arch;
use crate::error::{GraftError, Result};

/// well-known placeholder constants
///
/// on a 32-bit target only the low 4 bytes are embedded, which keeps the
/// same values usable for both architectures
pub mod placeholders {
    pub const SLOT_A: u64 = 0x4141_4141_4141_4141;
    pub const SLOT_B: u64 = 0x4242_4242_4242_4242;
    pub const SLOT_C: u64 = 0x4343_4343_4343_4343;
    pub const SLOT_D: u64 = 0x4444_4444_4444_4444;
    pub const SLOT_E: u64 = 0x4A4A_4A4A_4A4A_4A4A;
    pub const SLOT_F: u64 = 0x4B4B_4B4B_4B4B_4B4B;
    pub const SLOT_G: u64 = 0x4C4C_4C4C_4C4C_4C4C;
}

/// where a placeholder's resolved address comes from
#[derive(Debug, Clone, Copy)]
pub enum ExternTarget {
    /// resolved by export lookup inside the target process
    Export {
        module: &'static str,
        symbol: &'static str,
    },
    /// supplied directly by the caller (e.g. a previously grafted blob)
    Address(usize),
}

/// one placeholder and its resolution target
#[derive(Debug, Clone, Copy)]
pub struct ExternRef {
    pub placeholder: u64,
    pub target: ExternTarget,
}

/// a code blob plus the placeholders it carries
#[derive(Debug, Clone)]
pub struct CodeTemplate {
    pub arch: Arch,
    pub code: &'static [u8],
    pub refs: Vec<ExternRef>,
}

impl CodeTemplate {
    pub fn new(arch: Arch, code: &'static [u8]) -> Self {
        Self {
            arch,
            code,
            refs: Vec::new(),
        }
    }

    pub fn with_export(mut self, placeholder: u64, module: &'static str, symbol: &'static str) -> Self {
        self.refs.push(ExternRef {
            placeholder,
            target: ExternTarget::Export { module, symbol },
        });
        self
    }

    pub fn with_address(mut self, placeholder: u64, address: usize) -> Self {
        self.refs.push(ExternRef {
            placeholder,
            target: ExternTarget::Address(address),
        });
        self
    }
}

/// rewrite every occurrence of each placeholder with its resolved address
///
/// placeholders are matched and written at the target's pointer width, as
/// little-endian values; a placeholder that never occurs in the blob is an
/// error, since the routine would then call into garbage
pub fn resolve_placeholders(
    code: &mut [u8],
    arch: Arch,
    resolved: &[(u64, usize)],
) -> Result<()> {
    let width = arch.pointer_width();
    for &(placeholder, address) in resolved {
        let needle = &placeholder.to_le_bytes()[..width];
        let value = &(address as u64).to_le_bytes()[..width];

        let mut hits = 0usize;
        let mut pos = 0usize;
        while pos + width <= code.len() {
            if &code[pos..pos + width] == needle {
                code[pos..pos + width].copy_from_slice(value);
                hits += 1;
                pos += width;
            } else {
                pos += 1;
            }
        }
        if hits == 0 {
            return Err(GraftError::PlaceholderMissing { placeholder });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_writes_little_endian() {
        // mov rax, SLOT_A ; ret
        let mut code = [
            0x48, 0xB8, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0xC3,
        ];
        resolve_placeholders(
            &mut code,
            Arch::X64,
            &[(placeholders::SLOT_A, 0x7FF0_0000_1000)],
        )
        .unwrap();
        assert_eq!(
            u64::from_le_bytes(code[2..10].try_into().unwrap()),
            0x7FF0_0000_1000
        );
        assert_eq!(code[10], 0xC3);
    }

    #[test]
    fn test_resolve_all_occurrences() {
        let mut code = Vec::new();
        code.extend_from_slice(&placeholders::SLOT_B.to_le_bytes());
        code.extend_from_slice(&[0x90; 3]);
        code.extend_from_slice(&placeholders::SLOT_B.to_le_bytes());

        resolve_placeholders(&mut code, Arch::X64, &[(placeholders::SLOT_B, 0x1234)]).unwrap();
        assert_eq!(u64::from_le_bytes(code[0..8].try_into().unwrap()), 0x1234);
        assert_eq!(u64::from_le_bytes(code[11..19].try_into().unwrap()), 0x1234);
    }

    #[test]
    fn test_resolve_x86_width() {
        let mut code = [0xB8, 0x41, 0x41, 0x41, 0x41, 0xC3];
        resolve_placeholders(&mut code, Arch::X86, &[(placeholders::SLOT_A, 0x0040_1000)]).unwrap();
        assert_eq!(
            u32::from_le_bytes(code[1..5].try_into().unwrap()),
            0x0040_1000
        );
    }

    #[test]
    fn test_missing_placeholder() {
        let mut code = [0x90u8; 16];
        let err = resolve_placeholders(&mut code, Arch::X64, &[(placeholders::SLOT_C, 0x1000)]);
        assert!(matches!(
            err,
            Err(GraftError::PlaceholderMissing { placeholder }) if placeholder == placeholders::SLOT_C
        ));
        // blob untouched on failure
        assert_eq!(code, [0x90u8; 16]);
    }
}
