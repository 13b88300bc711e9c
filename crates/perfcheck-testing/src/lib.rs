//! # perfcheck Testing Fixtures
//!
//! Utilities for exercising the controller against real processes and a
//! real HTTP listener without an application framework:
//!
//! - **App fixture**: a temporary application root with a fake daemonizing
//!   launcher that records the environment it was started with
//! - **Instrumented server**: an HTTP target that answers with profiling
//!   headers and writes profiler artifacts as it serves
//!
//! ## Usage
//!
//! ```rust,no_run
//! use perfcheck_testing::{AppFixture, InstrumentedServer};
//!
//! let app = AppFixture::new();
//! let server = InstrumentedServer::builder()
//!     .runtime("0.120")
//!     .query_count("12")
//!     .start(app.root().join("tmp/perf_check/miniprofiler"), app.root());
//!
//! let config = app.config().port(server.port()).build().unwrap();
//! assert_eq!(config.port, server.port());
//! ```

/// Temporary application roots and the fake launcher
pub mod fixture;
/// Wiremock-backed instrumented target
pub mod server;

pub use fixture::AppFixture;
pub use server::{InstrumentedServer, InstrumentedServerBuilder, ResponseProfile};
