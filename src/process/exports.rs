//! Export directory parsing through the memory adapter
//!
//! Reads the PE export directory of a loaded image in any space, so a
//! symbol can be resolved inside a remote process without executing code
//! there.

use crate::error::{GraftError, Result};
use crate::memory::space::MemorySpace;

const DOS_MAGIC: u16 = 0x5A4D;
const PE_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;

/// IMAGE_EXPORT_DIRECTORY
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ExportDirectory {
    characteristics: u32,
    time_date_stamp: u32,
    major_version: u16,
    minor_version: u16,
    name: u32,                     // RVA to DLL name
    base: u32,                     // ordinal base
    number_of_functions: u32,
    number_of_names: u32,
    address_of_functions: u32,     // RVA to EAT
    address_of_names: u32,         // RVA to name pointers
    address_of_name_ordinals: u32, // RVA to ordinal array
}

/// one named export of a loaded module
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub address: usize,
    pub ordinal: u32,
}

/// locate the export directory of the image at `module_base`
///
/// returns (directory, directory RVA, directory size)
fn read_export_directory(
    space: &MemorySpace,
    module_base: usize,
) -> Result<(ExportDirectory, u32, u32)> {
    let dos_magic: u16 = space.read_value(module_base)?;
    if dos_magic != DOS_MAGIC {
        return Err(GraftError::InvalidImage {
            reason: "bad DOS magic",
        });
    }
    let e_lfanew: u32 = space.read_value(module_base + 0x3C)?;
    let nt = module_base + e_lfanew as usize;

    let signature: u32 = space.read_value(nt)?;
    if signature != PE_SIGNATURE {
        return Err(GraftError::InvalidImage {
            reason: "bad PE signature",
        });
    }

    let optional = nt + 0x18;
    let magic: u16 = space.read_value(optional)?;
    let directories = match magic {
        PE32_MAGIC => optional + 0x60,
        PE32_PLUS_MAGIC => optional + 0x70,
        _ => {
            return Err(GraftError::InvalidImage {
                reason: "unknown optional header magic",
            })
        }
    };

    let export_rva: u32 = space.read_value(directories)?;
    let export_size: u32 = space.read_value(directories + 4)?;
    if export_rva == 0 {
        return Err(GraftError::InvalidImage {
            reason: "no export directory",
        });
    }

    let dir: ExportDirectory = space.read_value(module_base + export_rva as usize)?;
    Ok((dir, export_rva, export_size))
}

/// read a null-terminated ASCII string, bounded at 256 bytes
fn read_c_string(space: &MemorySpace, address: usize) -> Result<String> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 32];
    let mut cursor = address;
    while out.len() < 256 {
        space.read(cursor, &mut chunk)?;
        match chunk.iter().position(|&b| b == 0) {
            Some(end) => {
                out.extend_from_slice(&chunk[..end]);
                break;
            }
            None => {
                out.extend_from_slice(&chunk);
                cursor += chunk.len();
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// enumerate the named exports of a loaded module
///
/// forwarded exports (whose entry points into the export directory
/// itself) are skipped; they resolve to a name, not code
pub fn enumerate_exports(space: &MemorySpace, module_base: usize) -> Result<Vec<Export>> {
    let (dir, export_rva, export_size) = read_export_directory(space, module_base)?;
    let forward_range = export_rva..export_rva + export_size;

    let names = module_base + dir.address_of_names as usize;
    let ordinals = module_base + dir.address_of_name_ordinals as usize;
    let functions = module_base + dir.address_of_functions as usize;

    let mut exports = Vec::with_capacity(dir.number_of_names as usize);
    for i in 0..dir.number_of_names as usize {
        let name_rva: u32 = space.read_value(names + i * 4)?;
        let ordinal: u16 = space.read_value(ordinals + i * 2)?;
        let func_rva: u32 = space.read_value(functions + ordinal as usize * 4)?;
        if forward_range.contains(&func_rva) {
            continue;
        }
        exports.push(Export {
            name: read_c_string(space, module_base + name_rva as usize)?,
            address: module_base + func_rva as usize,
            ordinal: dir.base + ordinal as u32,
        });
    }
    Ok(exports)
}

/// resolve a named export to its absolute address in the target space
pub fn find_export(space: &MemorySpace, module_base: usize, symbol: &str) -> Result<usize> {
    let (dir, export_rva, export_size) = read_export_directory(space, module_base)?;
    let forward_range = export_rva..export_rva + export_size;

    let names = module_base + dir.address_of_names as usize;
    let ordinals = module_base + dir.address_of_name_ordinals as usize;
    let functions = module_base + dir.address_of_functions as usize;

    for i in 0..dir.number_of_names as usize {
        let name_rva: u32 = space.read_value(names + i * 4)?;
        let name = read_c_string(space, module_base + name_rva as usize)?;
        if name != symbol {
            continue;
        }
        let ordinal: u16 = space.read_value(ordinals + i * 2)?;
        let func_rva: u32 = space.read_value(functions + ordinal as usize * 4)?;
        if forward_range.contains(&func_rva) {
            break;
        }
        return Ok(module_base + func_rva as usize);
    }

    Err(GraftError::ExportNotFound {
        module: format!("{module_base:#x}"),
        symbol: symbol.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::modules::find_module;

    #[test]
    fn test_find_export_matches_get_proc_address() {
        let space = MemorySpace::Own;
        let k32 = find_module(std::process::id(), "kernel32.dll").unwrap();

        let parsed = find_export(&space, k32.base, "GetTickCount64").unwrap();

        // SAFETY: resolving an export of an already loaded module
        let reference = unsafe {
            windows_sys::Win32::System::LibraryLoader::GetProcAddress(
                k32.base as _,
                c"GetTickCount64".as_ptr() as *const u8,
            )
        };
        assert_eq!(parsed, reference.map(|f| f as usize).unwrap_or(0));
    }

    #[test]
    fn test_enumerate_exports_nonempty() {
        let space = MemorySpace::Own;
        let k32 = find_module(std::process::id(), "kernel32.dll").unwrap();
        let exports = enumerate_exports(&space, k32.base).unwrap();
        assert!(exports.len() > 100);
        assert!(exports.iter().any(|e| e.name == "CreateRemoteThread"));
    }

    #[test]
    fn test_missing_export() {
        let space = MemorySpace::Own;
        let k32 = find_module(std::process::id(), "kernel32.dll").unwrap();
        let err = find_export(&space, k32.base, "NoSuchExport5c1a");
        assert!(matches!(err, Err(GraftError::ExportNotFound { .. })));
    }

    #[test]
    fn test_not_an_image() {
        let space = MemorySpace::Own;
        let data = [0u8; 64];
        let err = read_export_directory(&space, data.as_ptr() as usize);
        assert!(err.is_err());
    }
}
