//! # Application Root Fixture
//!
//! A temporary application root laid out the way the controller expects
//! (`tmp/pids`, the profiler artifact directory) plus an optional fake
//! launcher. The launcher is a `/bin/sh` script that behaves like a server
//! started with `-d`: it records the environment and arguments it received,
//! leaves a long-running background process behind, writes that process's
//! PID to the PID file and exits.
//!
//! Background jobs of a non-interactive shell start with SIGQUIT ignored.
//! The regular fake server restores the default action so SIGQUIT stops it;
//! the stubborn one keeps ignoring it and only goes away through SIGKILL.

use perfcheck_core::TargetConfigBuilder;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const PID_FILE: &str = "tmp/pids/server.pid";
const LAUNCH_ENV_FILE: &str = "tmp/launch_env.txt";
const LAUNCH_ARGS_FILE: &str = "tmp/launch_args.txt";
const LAUNCHES_FILE: &str = "tmp/launches.txt";
const SERVER_PIDS_FILE: &str = "tmp/server_pids.txt";

/// Time the fake server gets to act on SIGQUIT.
#[cfg(unix)]
const STOP_GRACE: Duration = Duration::from_millis(500);

#[cfg(unix)]
const LAUNCHER_SCRIPT: &str = r#"#!/bin/sh
env > tmp/launch_env.txt
echo "$@" > tmp/launch_args.txt
echo launch >> tmp/launches.txt
mkdir -p tmp/pids
if env --default-signal=QUIT true 2>/dev/null; then
    env --default-signal=QUIT sleep 300 &
else
    perl -e '$SIG{QUIT} = "DEFAULT"; sleep 300' &
fi
echo $! > tmp/pids/server.pid
echo $! >> tmp/server_pids.txt
exit 0
"#;

#[cfg(unix)]
const STUBBORN_LAUNCHER_SCRIPT: &str = r#"#!/bin/sh
echo launch >> tmp/launches.txt
mkdir -p tmp/pids
sleep 300 &
echo $! > tmp/pids/server.pid
echo $! >> tmp/server_pids.txt
exit 0
"#;

/// Temporary application root for controller tests.
#[derive(Debug)]
pub struct AppFixture {
    dir: TempDir,
}

impl AppFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create fixture app root");
        fs::create_dir_all(dir.path().join("tmp/pids")).expect("create pid directory");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root().join(PID_FILE)
    }

    /// Configuration rooted here, with no grace periods.
    pub fn config(&self) -> TargetConfigBuilder {
        TargetConfigBuilder::new()
            .app_root(self.root())
            .start_grace(Duration::ZERO)
            .stop_grace(Duration::ZERO)
    }

    /// [`config`](Self::config) launching the fake server script.
    ///
    /// Stopping relies on SIGQUIT alone: no `kill_after`, and a stop grace
    /// long enough for the fake server to die.
    #[cfg(unix)]
    pub fn launcher_config(&self) -> TargetConfigBuilder {
        let script = self.install_launcher();
        self.config()
            .launch_program(script.display().to_string())
            .launch_args(Vec::<String>::new())
            .stop_grace(STOP_GRACE)
            .kill_after(None)
    }

    /// [`config`](Self::config) launching a fake server that ignores SIGQUIT,
    /// with a short `kill_after` so `exit` escalates to SIGKILL.
    #[cfg(unix)]
    pub fn stubborn_launcher_config(&self) -> TargetConfigBuilder {
        let script = self.write_script("launch-stubborn-server.sh", STUBBORN_LAUNCHER_SCRIPT);
        self.config()
            .launch_program(script.display().to_string())
            .launch_args(Vec::<String>::new())
            .kill_after(Some(Duration::from_millis(200)))
    }

    /// Write the fake server launcher into the application root.
    #[cfg(unix)]
    pub fn install_launcher(&self) -> PathBuf {
        self.write_script("launch-server.sh", LAUNCHER_SCRIPT)
    }

    #[cfg(unix)]
    fn write_script(&self, name: &str, content: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.root().join(name);
        fs::write(&path, content).expect("write launcher script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("make launcher executable");
        path
    }

    pub fn write_pid(&self, pid: u32) {
        fs::write(self.pid_file(), pid.to_string()).expect("write pid file");
    }

    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(self.pid_file())
            .ok()
            .and_then(|content| content.trim().parse().ok())
    }

    /// Environment the most recent launch received.
    pub fn launch_env(&self) -> BTreeMap<String, String> {
        let content = fs::read_to_string(self.root().join(LAUNCH_ENV_FILE)).unwrap_or_default();
        parse_env_dump(&content)
    }

    /// Arguments the most recent launch received, space separated.
    pub fn launch_args(&self) -> Option<String> {
        fs::read_to_string(self.root().join(LAUNCH_ARGS_FILE))
            .ok()
            .map(|args| args.trim().to_string())
    }

    /// PIDs of every fake server the launcher left behind, oldest first.
    pub fn launched_pids(&self) -> Vec<u32> {
        fs::read_to_string(self.root().join(SERVER_PIDS_FILE))
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| line.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// How many times the launcher ran.
    pub fn launch_count(&self) -> usize {
        fs::read_to_string(self.root().join(LAUNCHES_FILE))
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    /// Write a file relative to the application root.
    pub fn write_file(&self, relative: impl AsRef<Path>, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directory");
        }
        fs::write(&path, content).expect("write fixture file");
        path
    }
}

impl Default for AppFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl Drop for AppFixture {
    fn drop(&mut self) {
        // Don't leave fake servers behind when a test fails midway.
        for pid in self.launched_pids() {
            let _ = std::process::Command::new("kill")
                .args(["-KILL", &pid.to_string()])
                .stderr(std::process::Stdio::null())
                .status();
        }
    }
}

/// Parse `env` output. Lines without `=` continue the previous value.
fn parse_env_dump(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    let mut last: Option<String> = None;

    for line in content.lines() {
        match line.split_once('=') {
            Some((key, value)) if is_env_key(key) => {
                vars.insert(key.to_string(), value.to_string());
                last = Some(key.to_string());
            }
            _ => {
                if let Some(value) = last.as_ref().and_then(|key| vars.get_mut(key)) {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }

    vars
}

fn is_env_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
