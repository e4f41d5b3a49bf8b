#![cfg(windows)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)] // we document safety in SAFETY comments

//! graft: byte-pattern patching and remote code grafting for Windows
//!
//! This library provides the primitives a security-research toolkit needs to
//! inspect and rewrite the memory of a running process:
//!
//! - Uniform memory access over the current or a remote process
//! - First-match byte-pattern scanning over bounded ranges
//! - Build-conditional patch tables (signatures differ per OS build)
//! - Byte patching with backup/rollback and transactional patch sets
//! - Process, service, module and export location
//! - Code templates with placeholder rewriting, grafted into a target
//!   process and invoked through a remote thread
//! - Prologue-splice trampolines and function-table pointer hooks
//!
//! The `commands` module hosts the thin feature clients built on top of the
//! engine (credential-log hook, skeleton key, remote lock/wallpaper,
//! NTLM-challenge patch, hook enumeration).

pub mod arch;
pub mod commands;
pub mod error;
pub mod inject;
pub mod memory;
pub mod patch;
pub mod process;
pub mod version;

// re-exports for convenience
pub use commands::Session;
pub use error::{GraftError, Result};
pub use memory::{Address, MemorySpace, Range, RemoteProcess};
pub use version::WindowsVersion;

/// library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
