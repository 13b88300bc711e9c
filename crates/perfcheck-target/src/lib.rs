//! # perfcheck-target
//!
//! Controls the application server a benchmark run measures:
//!
//! - **Lifecycle**: [`ProcessController`] launches the server with the run's
//!   environment overlay, stops it with SIGQUIT and reports its PID and
//!   resident memory
//! - **Profiling**: [`ProfilingClient`] hands an open [`Connection`] to a
//!   request callback and turns the instrumented response into a
//!   [`ProfileResult`](perfcheck_core::ProfileResult)
//! - **Artifacts**: [`ArtifactLocator`] clears profiler output before a
//!   request and resolves the results URL afterwards
//!
//! [`BenchmarkTarget`] ties the three together for one `host:port`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use perfcheck_core::{EnvironmentContext, TargetConfigBuilder};
//! use perfcheck_target::BenchmarkTarget;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TargetConfigBuilder::from_env()?.build()?;
//! let context = EnvironmentContext::builder().verify_no_diff(true).build();
//! let mut target = BenchmarkTarget::new(config, context);
//!
//! let result = target.profile(|connection| connection.send(connection.get("/users")?))?;
//! println!("{}", result.summary());
//!
//! target.exit()?;
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod connection;
pub mod error;
pub mod http;
pub mod launch;
pub mod memory;
pub mod process;
pub mod profiling;
pub mod signal;
pub mod target;

pub use artifacts::{ARTIFACT_PREFIX, ArtifactLocator, ProfilerArtifact};
pub use connection::{Connection, ConnectionGuard, Connector, RawResponse};
pub use error::{ArtifactError, ProcessError, ProfileError};
pub use http::{HttpConnection, HttpConnector};
pub use launch::LaunchCommand;
pub use process::{ProcessController, ServerProcess, ServerState};
pub use profiling::{ProfilingClient, QUERY_COUNT_HEADER, RUNTIME_HEADER, STACK_TRACE_HEADER};
pub use target::BenchmarkTarget;
