//! Hook survey across all reachable processes
//!
//! Opens every process read-only, walks the export table of each loaded
//! module, and reports exports whose entry chain escapes the owning
//! module. Processes and modules that cannot be opened or parsed are
//! skipped and logged rather than aborting the sweep.

use crate::commands::Session;
use crate::error::Result;
use crate::memory::space::{MemorySpace, ProcessAccess};
use crate::process::hookscan::{scan_module, HookReport};
use crate::process::locator::enumerate_processes;
use crate::process::modules::enumerate_modules;

/// every redirected export found in one process
#[derive(Debug)]
pub struct ProcessReport {
    pub pid: u32,
    pub process: String,
    pub hooks: Vec<HookReport>,
}

/// sweep one process
pub fn scan_process(session: &Session, pid: u32) -> Result<Vec<HookReport>> {
    let space = MemorySpace::open_remote_with(pid, ProcessAccess::read_only())?;
    let mut hooks = Vec::new();
    for module in enumerate_modules(pid)? {
        match scan_module(&space, session.arch, &module) {
            Ok(mut reports) => hooks.append(&mut reports),
            // a module can unload mid-scan or carry a packed header
            Err(e) => tracing::debug!(pid, module = %module.name, error = %e, "module skipped"),
        }
    }
    Ok(hooks)
}

/// sweep every process the caller can open
///
/// only processes with findings appear in the result; the idle and system
/// pseudo-processes are never opened
pub fn scan_all(session: &Session) -> Result<Vec<ProcessReport>> {
    let mut reports = Vec::new();
    for entry in enumerate_processes()? {
        if entry.pid <= 4 {
            continue;
        }
        match scan_process(session, entry.pid) {
            Ok(hooks) => {
                if !hooks.is_empty() {
                    reports.push(ProcessReport {
                        pid: entry.pid,
                        process: entry.name,
                        hooks,
                    });
                }
            }
            Err(e) => {
                tracing::debug!(pid = entry.pid, process = %entry.name, error = %e, "process skipped")
            }
        }
    }
    tracing::info!(flagged = reports.len(), "hook sweep finished");
    Ok(reports)
}
