//! Uniform memory access over the current or a remote process
//!
//! - `space`: address-space adapter, addresses and ranges
//! - `scanner`: first-match byte scanning over bounded ranges

pub mod scanner;
pub mod space;

pub use scanner::Scanner;
pub use space::{Address, Allocation, MemorySpace, ProtectionGuard, Range, RemoteProcess};
