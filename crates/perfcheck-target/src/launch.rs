//! Launch command construction
//!
//! The target is started as `<program> <args...> -b <host> -p <port> -d` from
//! the application root. The run environment is passed to the spawned process
//! as an explicit overlay; the controller's own environment is left untouched.

use perfcheck_core::TargetConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// The daemonizing server-start invocation for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl LaunchCommand {
    pub fn from_config(config: &TargetConfig) -> Self {
        let mut args = config.launch_args.clone();
        args.extend([
            "-b".to_string(),
            config.host.clone(),
            "-p".to_string(),
            config.port.to_string(),
            "-d".to_string(),
        ]);

        Self {
            program: config.launch_program.clone(),
            args,
            working_dir: config.app_root.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list, bind and daemonize flags included.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Build the process with `overlay` added to the inherited environment.
    /// Output is discarded; a daemonized server logs on its own.
    pub fn command(&self, overlay: &BTreeMap<String, String>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(overlay)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl std::fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
