//! Build-conditional byte patching
//!
//! - `table`: pattern tables keyed by minimum OS build
//! - `apply`: the generic patcher, backups and transactional patch sets

pub mod apply;
pub mod table;

pub use apply::{apply_for_build, patch, patch_with_backup, PatchBackup, PatchSet};
pub use table::{PatchEntry, PatchTable};
