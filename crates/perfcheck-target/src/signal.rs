//! Signal delivery to the target process.

use crate::error::ProcessError;

/// Signals the controller sends to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful shutdown request (SIGQUIT).
    Quit,
    /// Forced termination (SIGKILL), only used when escalation is configured.
    Kill,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Quit => "SIGQUIT",
            Signal::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Quit => libc::SIGQUIT,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// What happened when a signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The process was already gone.
    NoSuchProcess,
}

/// Send `signal` to `pid`.
///
/// # Errors
///
/// Returns `ProcessError::Signal` if the PID is out of range or the kernel
/// rejects the signal for any reason other than the process being gone.
#[cfg(unix)]
pub fn send(pid: u32, signal: Signal) -> Result<Delivery, ProcessError> {
    let raw_pid = libc::pid_t::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        signal: signal.name(),
        reason: "pid out of range".to_string(),
    })?;
    if raw_pid <= 0 {
        return Err(ProcessError::Signal {
            pid,
            signal: signal.name(),
            reason: "refusing to signal a process group".to_string(),
        });
    }

    // SAFETY: kill(2) takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::kill(raw_pid, signal.raw()) };
    if rc == 0 {
        return Ok(Delivery::Delivered);
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(Delivery::NoSuchProcess)
    } else {
        Err(ProcessError::Signal {
            pid,
            signal: signal.name(),
            reason: err.to_string(),
        })
    }
}

#[cfg(not(unix))]
pub fn send(pid: u32, signal: Signal) -> Result<Delivery, ProcessError> {
    Err(ProcessError::Signal {
        pid,
        signal: signal.name(),
        reason: "signals are only supported on unix".to_string(),
    })
}
