//! # perfcheck-core
//!
//! Data types shared by the perfcheck controller and its callers:
//!
//! - **Run contexts**: [`EnvironmentContext`] selects the reference or branch
//!   side of a comparison and derives the launch environment for the target
//! - **Profile results**: [`ProfileResult`] holds the measurements captured
//!   from one instrumented request
//! - **Configuration**: [`TargetConfig`] describes where the target lives and
//!   how it is launched, loaded from files and `PERFCHECK_*` variables

pub mod config;
pub mod context;
pub mod profile;

pub use config::{ConfigError, TargetConfig, TargetConfigBuilder};
pub use context::{
    EnvironmentContext, EnvironmentContextBuilder, PERF_CHECK, PERF_CHECK_NOCACHING,
    PERF_CHECK_VERIFICATION, RunSide,
};
pub use profile::ProfileResult;
