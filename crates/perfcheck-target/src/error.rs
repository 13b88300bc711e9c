//! # Error Types
//!
//! One error enum per concern of the controller. [`ProfileError`] is what a
//! profiling round trip returns and wraps the others, keeping infrastructure
//! failures (the server is gone or refuses connections) distinguishable from
//! a response that is not instrumented the way perfcheck expects.

use std::io;
use std::path::PathBuf;

/// Errors from managing the target server process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// No usable PID file; the server has to be started first.
    #[error("server is not running (pid file {pid_file}): {reason}")]
    NotRunning { pid_file: PathBuf, reason: String },

    /// The launcher could not be spawned or exited unsuccessfully.
    #[error("failed to launch `{command}`: {reason}")]
    LaunchFailed { command: String, reason: String },

    /// The operating system has no process with this PID.
    #[error("no process with pid {pid}")]
    Lookup { pid: u32 },

    #[error("failed to send {signal} to pid {pid}: {reason}")]
    Signal {
        pid: u32,
        signal: &'static str,
        reason: String,
    },
}

impl ProcessError {
    pub(crate) fn not_running(pid_file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::NotRunning {
            pid_file: pid_file.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn launch_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LaunchFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from clearing or resolving profiler artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The request did not leave a profiler artifact behind.
    #[error("no profiler artifact found in {dir}")]
    NotFound { dir: PathBuf },

    #[error("artifact I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid profiler url: {0}")]
    Url(#[from] url::ParseError),
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a profiling round trip.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// The server refused or dropped the connection.
    #[error("couldn't connect to the target server at {addr}: {reason}")]
    Connection { addr: String, reason: String },

    /// The read timeout elapsed before the server answered.
    #[error("request to {addr} timed out")]
    Timeout { addr: String },

    /// The request failed for a reason other than connectivity.
    #[error("request failed: {0}")]
    Request(String),

    /// The callback tried to use a connection after finishing it.
    #[error("connection already finished")]
    ConnectionFinished,

    /// A required profiling header is absent.
    #[error("response is missing the {name} header; is the target instrumented?")]
    MissingHeader { name: &'static str },

    #[error("invalid {name} header '{value}': {reason}")]
    InvalidHeader {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read backtrace file {path}: {source}")]
    Backtrace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl ProfileError {
    /// Create a connection error.
    pub fn connection(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Check whether the failure is about reaching the server rather than
    /// about what it answered. Callers may retry or skip these.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::Process(ProcessError::NotRunning { .. })
                | Self::Process(ProcessError::LaunchFailed { .. })
        )
    }
}

impl From<io::Error> for ProfileError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::Connection {
                addr: "target".to_string(),
                reason: err.to_string(),
            },
            io::ErrorKind::TimedOut => Self::Timeout {
                addr: "target".to_string(),
            },
            _ => Self::Io(err),
        }
    }
}

impl From<reqwest::Error> for ProfileError {
    fn from(err: reqwest::Error) -> Self {
        let addr = err
            .url()
            .and_then(|url| {
                url.host_str()
                    .map(|host| format!("{host}:{}", url.port_or_known_default().unwrap_or(80)))
            })
            .unwrap_or_else(|| "target".to_string());

        if err.is_connect() {
            Self::Connection {
                addr,
                reason: err.to_string(),
            }
        } else if err.is_timeout() {
            Self::Timeout { addr }
        } else {
            Self::Request(err.to_string())
        }
    }
}
