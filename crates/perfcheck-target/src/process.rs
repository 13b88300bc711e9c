//! # Target Server Lifecycle
//!
//! [`ProcessController`] owns the lifecycle of one locally launched
//! application server bound to a single `host:port`:
//!
//! - **start**: launch the daemonizing server with the run's environment
//!   overlay, then wait the start grace period
//! - **exit**: send SIGQUIT to the PID from the PID file, then wait the stop
//!   grace period (optionally escalating to SIGKILL)
//! - **restart**: exit if running, then start
//!
//! The PID is never generated here. It is read from the PID file the server
//! writes. A launch whose PID file is still missing after the start grace
//! period is a failed launch, so a running controller always knows its PID.

use crate::error::ProcessError;
use crate::launch::LaunchCommand;
use crate::memory;
use crate::signal::{self, Delivery, Signal};
use perfcheck_core::{EnvironmentContext, TargetConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LIVENESS_POLL: Duration = Duration::from_millis(50);
const KILL_SETTLE: Duration = Duration::from_secs(1);

/// Whether the controller believes its server is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Running,
}

/// Snapshot of the managed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerProcess {
    pub app_root: PathBuf,
    pub host: String,
    pub port: u16,
    /// Present exactly when `state` is `Running`
    pub pid: Option<u32>,
    pub state: ServerState,
}

/// Starts, stops and inspects the target server.
#[derive(Debug)]
pub struct ProcessController {
    config: TargetConfig,
    launch: LaunchCommand,
    /// PID of the running server; `None` while stopped.
    running_pid: Option<u32>,
    last_launch_environment: Option<BTreeMap<String, String>>,
}

impl ProcessController {
    pub fn new(config: TargetConfig) -> Self {
        let launch = LaunchCommand::from_config(&config);
        Self {
            config,
            launch,
            running_pid: None,
            last_launch_environment: None,
        }
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn launch_command(&self) -> &LaunchCommand {
        &self.launch
    }

    /// The overlay applied by the most recent successful launch.
    pub fn last_launch_environment(&self) -> Option<&BTreeMap<String, String>> {
        self.last_launch_environment.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running_pid.is_some()
    }

    pub fn state(&self) -> ServerState {
        if self.is_running() {
            ServerState::Running
        } else {
            ServerState::Stopped
        }
    }

    /// Launch the server for `context` and wait for it to settle.
    ///
    /// Does nothing when the server is already running; use
    /// [`restart`](Self::restart) to apply a new context.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::LaunchFailed` if the launcher cannot be spawned,
    /// exits unsuccessfully, or leaves no PID file behind once the start grace
    /// period is over. The controller stays stopped in that case.
    pub fn start(&mut self, context: &EnvironmentContext) -> Result<(), ProcessError> {
        if self.is_running() {
            debug!(address = %self.config.bind_address(), "target server already running");
            return Ok(());
        }

        let overlay = context.launch_overlay();
        info!(
            side = %context.side(),
            command = %self.launch,
            app_root = %self.config.app_root.display(),
            "launching target server"
        );

        let status = self
            .launch
            .command(&overlay)
            .status()
            .map_err(|e| ProcessError::launch_failed(self.launch.to_string(), e.to_string()))?;
        if !status.success() {
            return Err(ProcessError::launch_failed(
                self.launch.to_string(),
                format!("launcher exited with {status}"),
            ));
        }

        debug!(grace = ?self.config.start_grace, "waiting for target server to boot");
        thread::sleep(self.config.start_grace);

        let pid = self.pid().map_err(|err| {
            ProcessError::launch_failed(
                self.launch.to_string(),
                format!("no pid after {:?} start grace: {err}", self.config.start_grace),
            )
        })?;

        info!(pid, address = %self.config.bind_address(), "target server running");
        self.running_pid = Some(pid);
        self.last_launch_environment = Some(overlay);
        Ok(())
    }

    /// Ask the server to quit and wait for it to go away.
    ///
    /// A no-op when already stopped. The PID file is authoritative; when it
    /// has gone missing the PID recorded at start is signalled if that
    /// process is still alive.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Signal` if the quit (or escalation) signal is
    /// rejected for a reason other than the process being gone.
    pub fn exit(&mut self) -> Result<(), ProcessError> {
        let Some(recorded) = self.running_pid else {
            debug!("target server already stopped");
            return Ok(());
        };

        let pid = match self.pid() {
            Ok(pid) => pid,
            Err(_) if memory::is_alive(recorded) => {
                warn!(pid = recorded, "pid file is gone; signalling the pid recorded at start");
                recorded
            }
            Err(err) => {
                info!(pid = recorded, error = %err, "target server is already gone");
                self.running_pid = None;
                return Ok(());
            }
        };

        match signal::send(pid, Signal::Quit)? {
            Delivery::NoSuchProcess => {
                info!(pid, "target server was already gone");
            }
            Delivery::Delivered => {
                info!(pid, grace = ?self.config.stop_grace, "sent SIGQUIT to target server");
                thread::sleep(self.config.stop_grace);

                if let Some(kill_after) = self.config.kill_after {
                    self.escalate(pid, kill_after)?;
                }
            }
        }

        self.running_pid = None;
        Ok(())
    }

    /// Stop the server if it is running, then start it with `context`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`exit`](Self::exit) and [`start`](Self::start).
    pub fn restart(&mut self, context: &EnvironmentContext) -> Result<(), ProcessError> {
        if self.is_running() {
            self.exit()?;
        }
        self.start(context)
    }

    /// Read the server's PID from its PID file.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::NotRunning` if the file is missing or does not
    /// contain a PID.
    pub fn pid(&self) -> Result<u32, ProcessError> {
        read_pid_file(&self.config.pid_file_path())
    }

    /// Resident memory of `pid` in kilobytes.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Lookup` if the process no longer exists.
    pub fn mem(&self, pid: u32) -> Result<u64, ProcessError> {
        memory::resident_memory_kb(pid)
    }

    /// Adopt a server left running by an earlier controller.
    ///
    /// Returns whether the controller now considers the server running.
    pub fn attach(&mut self) -> bool {
        if self.is_running() {
            return true;
        }

        match self.pid() {
            Ok(pid) if memory::is_alive(pid) => {
                info!(pid, "attached to running target server");
                self.running_pid = Some(pid);
                true
            }
            Ok(pid) => {
                debug!(pid, "pid file points at a dead process");
                false
            }
            Err(_) => false,
        }
    }

    pub fn process(&self) -> ServerProcess {
        ServerProcess {
            app_root: self.config.app_root.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            pid: self.running_pid,
            state: self.state(),
        }
    }

    fn escalate(&self, pid: u32, kill_after: Duration) -> Result<(), ProcessError> {
        if wait_for_exit(pid, kill_after) {
            return Ok(());
        }

        warn!(pid, ?kill_after, "target server ignored SIGQUIT; sending SIGKILL");
        let delivery = signal::send(pid, Signal::Kill)?;
        if delivery == Delivery::Delivered && !wait_for_exit(pid, KILL_SETTLE) {
            warn!(pid, "target server still present after SIGKILL");
        }

        // A killed server cannot clean up after itself.
        let pid_file = self.config.pid_file_path();
        match std::fs::remove_file(&pid_file) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %pid_file.display(), error = %err, "failed to remove stale pid file");
            }
            _ => {}
        }

        Ok(())
    }
}

/// Poll until `pid` is gone or `timeout` elapses. Returns whether it is gone.
fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !memory::is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(LIVENESS_POLL);
    }
}

fn read_pid_file(path: &Path) -> Result<u32, ProcessError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ProcessError::not_running(path, e.to_string()))?;

    let raw = content.trim();
    raw.parse::<u32>()
        .map_err(|e| ProcessError::not_running(path, format!("invalid pid '{raw}': {e}")))
}
