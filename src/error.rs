//! Unified error types for graft

use core::fmt;

/// all errors that can occur in graft
#[derive(Debug)]
pub enum GraftError {
    // === address space access ===
    /// failed to open the target process
    ProcessOpenFailed { pid: u32, code: u32 },

    /// memory read operation failed
    ReadFailed { address: u64, size: usize },

    /// memory write operation failed
    WriteFailed { address: u64, size: usize },

    /// memory allocation in the target failed
    AllocationFailed { size: usize, protection: u32 },

    /// failed to change memory protection
    ProtectionChangeFailed { address: u64, size: usize },

    // === pattern / build selection ===
    /// byte signature absent from the scanned range
    PatternNotFound { context: &'static str },

    /// no pattern-table entry applies to the running OS build
    UnsupportedBuild { build: u32 },

    /// no code template exists for the target architecture
    UnsupportedArchitecture,

    // === location ===
    /// process with given image name not found
    ProcessNotFound { name: String },

    /// service not found or not running
    ServiceNotFound { name: String },

    /// module with given name not loaded in the target
    ModuleNotFound { name: String },

    /// named export missing from a target module
    ExportNotFound { module: String, symbol: String },

    /// PE image data appears malformed
    InvalidImage { reason: &'static str },

    // === injection ===
    /// code template does not contain a declared placeholder
    PlaceholderMissing { placeholder: u64 },

    /// remote thread creation failed
    RemoteThreadFailed { code: u32 },

    /// remote call did not complete within the caller-supplied timeout
    WaitTimedOut,

    /// displaced prologue region too small for the jump stub
    SpliceTooShort { needed: usize, available: usize },

    // === structure access ===
    /// failed to access PEB
    InvalidPebAccess,

    // === win32 ===
    /// underlying Win32 API returned error
    Win32Error { code: u32, context: &'static str },
}

impl fmt::Display for GraftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessOpenFailed { pid, code } => {
                write!(f, "failed to open process {pid} (error {code:#x})")
            }
            Self::ReadFailed { address, size } => {
                write!(f, "failed to read {size} bytes at {address:#x}")
            }
            Self::WriteFailed { address, size } => {
                write!(f, "failed to write {size} bytes at {address:#x}")
            }
            Self::AllocationFailed { size, protection } => {
                write!(
                    f,
                    "failed to allocate {size} bytes with protection {protection:#x}"
                )
            }
            Self::ProtectionChangeFailed { address, size } => {
                write!(
                    f,
                    "failed to change protection for {size} bytes at {address:#x}"
                )
            }
            Self::PatternNotFound { context } => {
                write!(f, "pattern not found: {context}")
            }
            Self::UnsupportedBuild { build } => {
                write!(f, "no pattern entry applies to OS build {build}")
            }
            Self::UnsupportedArchitecture => {
                write!(f, "no code template for the target architecture")
            }
            Self::ProcessNotFound { name } => {
                write!(f, "process not found: {name}")
            }
            Self::ServiceNotFound { name } => {
                write!(f, "service not found or not running: {name}")
            }
            Self::ModuleNotFound { name } => {
                write!(f, "module not found: {name}")
            }
            Self::ExportNotFound { module, symbol } => {
                write!(f, "export not found: {module}!{symbol}")
            }
            Self::InvalidImage { reason } => {
                write!(f, "invalid PE image: {reason}")
            }
            Self::PlaceholderMissing { placeholder } => {
                write!(f, "placeholder {placeholder:#x} not present in code template")
            }
            Self::RemoteThreadFailed { code } => {
                write!(f, "remote thread creation failed (error {code:#x})")
            }
            Self::WaitTimedOut => {
                write!(f, "remote call timed out")
            }
            Self::SpliceTooShort { needed, available } => {
                write!(
                    f,
                    "displaced region too small for jump stub ({needed} > {available})"
                )
            }
            Self::InvalidPebAccess => {
                write!(f, "failed to access PEB")
            }
            Self::Win32Error { code, context } => {
                write!(f, "Win32 error {code:#x} in {context}")
            }
        }
    }
}

impl std::error::Error for GraftError {}

/// result type alias using GraftError
pub type Result<T> = std::result::Result<T, GraftError>;

impl GraftError {
    /// create Win32Error from GetLastError
    pub fn from_last_error(context: &'static str) -> Self {
        // SAFETY: GetLastError is always safe to call
        let code = unsafe { windows_sys::Win32::Foundation::GetLastError() };
        Self::Win32Error { code, context }
    }
}
