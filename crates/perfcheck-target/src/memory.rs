//! Process inspection through `sysinfo`.

use crate::error::ProcessError;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Resident set size of `pid` in kilobytes.
///
/// # Errors
///
/// Returns `ProcessError::Lookup` if no such process exists.
pub fn resident_memory_kb(pid: u32) -> Result<u64, ProcessError> {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

    system
        .process(sys_pid)
        .map(|process| process.memory() / 1024)
        .ok_or(ProcessError::Lookup { pid })
}

/// Whether `pid` names a live (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

    system.process(sys_pid).is_some_and(|process| {
        !matches!(
            process.status(),
            ProcessStatus::Zombie | ProcessStatus::Dead
        )
    })
}
