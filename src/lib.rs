//! # perfcheck
//!
//! Benchmark target controller for reference-versus-branch performance runs.
//! perfcheck launches the application under test with run-specific
//! environment flags, profiles single requests against it, and reports
//! latency, query count, memory and profiler artifacts for each.
//!
//! ## Core Components
//!
//! - **[EnvironmentContext]**: which side of the comparison runs, and with
//!   which toggles and variables
//! - **[ProcessController]**: start, stop and inspect the target server
//! - **[ProfilingClient]**: one instrumented request in, one [ProfileResult] out
//! - **[ArtifactLocator]**: profiler artifact cleanup and URL resolution
//! - **[BenchmarkTarget]**: all of the above for one `host:port`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use perfcheck::{BenchmarkTarget, EnvironmentContext, TargetConfigBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TargetConfigBuilder::from_env()?.build()?;
//! let options = EnvironmentContext::builder()
//!     .caching_enabled(false)
//!     .branch_env("FEATURE_X", "on")
//!     .build();
//!
//! let mut target = BenchmarkTarget::new(config, options.for_branch());
//! let branch = target.profile(|c| c.send(c.get("/dashboard")?))?;
//!
//! target.restart(options.for_reference())?;
//! let reference = target.profile(|c| c.send(c.get("/dashboard")?))?;
//! target.exit()?;
//!
//! println!("branch    {}", branch.summary());
//! println!("reference {}", reference.summary());
//! # Ok(())
//! # }
//! ```

pub use perfcheck_core::{
    ConfigError, EnvironmentContext, EnvironmentContextBuilder, PERF_CHECK, PERF_CHECK_NOCACHING,
    PERF_CHECK_VERIFICATION, ProfileResult, RunSide, TargetConfig, TargetConfigBuilder,
};
pub use perfcheck_target::{
    ArtifactError, ArtifactLocator, BenchmarkTarget, Connection, ConnectionGuard, Connector,
    HttpConnection, HttpConnector, ProcessController, ProcessError, ProfileError, ProfilingClient,
    RawResponse, ServerProcess, ServerState,
};

