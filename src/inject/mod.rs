//! Code grafting into a target process
//!
//! - `template`: relocatable code blobs with placeholder constants
//! - `engine`: placeholder resolution and remote commit
//! - `call`: synchronous invocation of grafted code via a remote thread
//! - `trampoline`: pointer patches and prologue splices

pub mod call;
pub mod engine;
pub mod template;
pub mod trampoline;

pub use call::{call, RemoteCallOutput};
pub use engine::inject;
pub use template::{CodeTemplate, ExternRef, ExternTarget};
pub use trampoline::{patch_pointer, splice, SpliceHook};
