//! Target location: processes, services, modules, exports
//!
//! - `locator`: PID lookup by image name or service name
//! - `modules`: loaded-module enumeration in a target process
//! - `exports`: export directory parsing through the memory adapter
//! - `hookscan`: redirect walker over exported entry points

pub mod exports;
pub mod hookscan;
pub mod locator;
pub mod modules;

pub use exports::{find_export, Export};
pub use hookscan::{HookReport, Redirect, RedirectKind};
pub use locator::{enumerate_processes, find_process_by_name, find_service_process, ProcessEntry};
pub use modules::{enumerate_modules, find_module, ModuleInfo};
