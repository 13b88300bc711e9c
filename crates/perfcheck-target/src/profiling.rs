//! # Profiling Round Trip
//!
//! [`ProfilingClient::profile`] clears stale artifacts, makes sure the target
//! is up, opens a connection and hands it to a caller-supplied callback that
//! issues the actual request. The instrumented response is then turned into
//! a [`ProfileResult`].
//!
//! The target reports its measurements in response headers:
//!
//! | Header | Meaning |
//! |---|---|
//! | `X-Runtime` | elapsed seconds, decimal |
//! | `X-PerfCheck-Query-Count` | queries issued, integer |
//! | `X-PerfCheck-StackTrace` | optional path to a newline-delimited backtrace |
//!
//! Missing or malformed measurement headers are errors. A target that does
//! not send them is not instrumented, and reporting zero would hide that.

use crate::artifacts::ArtifactLocator;
use crate::connection::{Connector, ConnectionGuard, RawResponse};
use crate::error::ProfileError;
use crate::http::HttpConnector;
use crate::process::ProcessController;
use perfcheck_core::{EnvironmentContext, ProfileResult, TargetConfig};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const RUNTIME_HEADER: &str = "X-Runtime";
pub const QUERY_COUNT_HEADER: &str = "X-PerfCheck-Query-Count";
pub const STACK_TRACE_HEADER: &str = "X-PerfCheck-StackTrace";

/// Runs profiling requests against one target.
#[derive(Debug, Clone)]
pub struct ProfilingClient<C: Connector = HttpConnector> {
    connector: C,
    locator: ArtifactLocator,
    host: String,
    port: u16,
    read_timeout: Duration,
}

impl ProfilingClient<HttpConnector> {
    pub fn new(config: &TargetConfig) -> Self {
        Self::with_connector(config, HttpConnector)
    }
}

impl<C: Connector> ProfilingClient<C> {
    pub fn with_connector(config: &TargetConfig, connector: C) -> Self {
        Self {
            connector,
            locator: ArtifactLocator::new(config),
            host: config.host.clone(),
            port: config.port,
            read_timeout: config.read_timeout,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Profile one request.
    ///
    /// `request_fn` receives the open connection and returns the raw
    /// response. The connection is finished exactly once afterwards, also
    /// when the callback fails, panics, or finishes it itself.
    ///
    /// # Errors
    ///
    /// - `ProfileError::Connection` / `ProfileError::Timeout` if the target
    ///   cannot be reached, including when the callback reports it
    /// - `ProfileError::MissingHeader` / `ProfileError::InvalidHeader` if the
    ///   response is not instrumented as expected
    /// - `ProfileError::Artifact` if no profiler artifact was written
    /// - `ProfileError::Process` if the server cannot be started or its
    ///   memory cannot be read
    /// - `ProfileError::Backtrace` if the reported backtrace file is unreadable
    pub fn profile<F>(
        &self,
        controller: &mut ProcessController,
        context: &EnvironmentContext,
        request_fn: F,
    ) -> Result<ProfileResult, ProfileError>
    where
        F: FnOnce(&mut C::Connection) -> Result<RawResponse, ProfileError>,
    {
        self.locator.prepare_to_profile()?;

        if !controller.is_running() {
            debug!(side = %context.side(), "no target server running; starting one");
            controller.start(context)?;
        }

        let connection = self
            .connector
            .connect(&self.host, self.port, self.read_timeout)?;
        let response = {
            let mut guard = ConnectionGuard::new(connection);
            request_fn(&mut *guard)
        }
        .map_err(|err| self.locate(err))?;

        let latency_ms = parse_runtime(&response)? * 1000.0;
        let query_count = parse_query_count(&response)?;
        let profile_url = self.locator.latest_profiler_url()?;

        let pid = controller.pid()?;
        let server_memory_kb = controller.mem(pid)?;
        let backtrace = read_backtrace(&response)?;

        let response_code = response.status();
        info!(
            side = %context.side(),
            status = response_code,
            latency_ms,
            query_count,
            server_memory_kb,
            profile_url = %profile_url,
            "profiled request"
        );

        Ok(ProfileResult {
            latency_ms,
            query_count,
            profile_url,
            response_code,
            response_body: response.into_body(),
            server_memory_kb,
            backtrace,
        })
    }

    /// Attach this target's address to connectivity errors raised without one.
    fn locate(&self, err: ProfileError) -> ProfileError {
        match err {
            ProfileError::Connection { reason, .. } => {
                warn!(addr = %self.addr(), %reason, "target refused the profiling connection");
                ProfileError::Connection {
                    addr: self.addr(),
                    reason,
                }
            }
            ProfileError::Timeout { .. } => ProfileError::Timeout { addr: self.addr() },
            other => other,
        }
    }
}

fn required_header<'a>(
    response: &'a RawResponse,
    name: &'static str,
) -> Result<&'a str, ProfileError> {
    response
        .header(name)
        .map(str::trim)
        .ok_or(ProfileError::MissingHeader { name })
}

fn parse_runtime(response: &RawResponse) -> Result<f64, ProfileError> {
    let raw = required_header(response, RUNTIME_HEADER)?;
    let invalid = |reason: String| ProfileError::InvalidHeader {
        name: RUNTIME_HEADER,
        value: raw.to_string(),
        reason,
    };

    let seconds = raw.parse::<f64>().map_err(|e| invalid(e.to_string()))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid("expected a non-negative number of seconds".to_string()));
    }
    Ok(seconds)
}

fn parse_query_count(response: &RawResponse) -> Result<u64, ProfileError> {
    let raw = required_header(response, QUERY_COUNT_HEADER)?;
    raw.parse::<u64>()
        .map_err(|e| ProfileError::InvalidHeader {
            name: QUERY_COUNT_HEADER,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn read_backtrace(response: &RawResponse) -> Result<Option<Vec<String>>, ProfileError> {
    let Some(raw) = response.header(STACK_TRACE_HEADER) else {
        return Ok(None);
    };

    let path = PathBuf::from(raw.trim());
    let content = fs::read_to_string(&path)
        .map_err(|source| ProfileError::Backtrace { path, source })?;
    Ok(Some(content.lines().map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ARTIFACT_PREFIX;
    use crate::connection::Connection;
    use perfcheck_core::TargetConfigBuilder;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts how often connections are opened and finished.
    #[derive(Debug, Clone, Default)]
    struct RecordingConnector {
        connects: Arc<AtomicUsize>,
        finishes: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct RecordingConnection {
        finished: bool,
        finishes: Arc<AtomicUsize>,
    }

    impl Connection for RecordingConnection {
        fn finish(&mut self) {
            self.finished = true;
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }

        fn is_finished(&self) -> bool {
            self.finished
        }
    }

    impl Connector for RecordingConnector {
        type Connection = RecordingConnection;

        fn connect(
            &self,
            _host: &str,
            _port: u16,
            _read_timeout: Duration,
        ) -> Result<RecordingConnection, ProfileError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(RecordingConnection {
                finished: false,
                finishes: Arc::clone(&self.finishes),
            })
        }
    }

    struct Harness {
        dir: TempDir,
        client: ProfilingClient<RecordingConnector>,
        controller: ProcessController,
        connector: RecordingConnector,
    }

    impl Harness {
        /// A client whose controller is attached to the test process itself.
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let pids = dir.path().join("tmp/pids");
            fs::create_dir_all(&pids).unwrap();
            fs::write(pids.join("server.pid"), std::process::id().to_string()).unwrap();

            let config = TargetConfigBuilder::new()
                .app_root(dir.path())
                .port(3031)
                .start_grace(Duration::ZERO)
                .stop_grace(Duration::ZERO)
                .build()
                .unwrap();
            let connector = RecordingConnector::default();
            let client = ProfilingClient::with_connector(&config, connector.clone());
            let mut controller = ProcessController::new(config);
            assert!(controller.attach());

            Self {
                dir,
                client,
                controller,
                connector,
            }
        }

        /// Stand in for the instrumented server writing its artifact.
        fn write_artifact(&self, id: &str) {
            let dir = self.client.locator().artifact_dir();
            fs::create_dir_all(dir).unwrap();
            fs::write(dir.join(format!("{ARTIFACT_PREFIX}{id}")), "{}").unwrap();
        }

        fn profile<F>(&mut self, request_fn: F) -> Result<ProfileResult, ProfileError>
        where
            F: FnOnce(&mut RecordingConnection) -> Result<RawResponse, ProfileError>,
        {
            let context = EnvironmentContext::default();
            self.client
                .profile(&mut self.controller, &context, request_fn)
        }

        fn finishes(&self) -> usize {
            self.connector.finishes.load(Ordering::SeqCst)
        }
    }

    fn instrumented(runtime: &str, queries: &str) -> RawResponse {
        RawResponse::new(200, "body")
            .with_header(RUNTIME_HEADER, runtime)
            .with_header(QUERY_COUNT_HEADER, queries)
    }

    #[test]
    fn test_profile_builds_result_from_headers() {
        let mut harness = Harness::new();
        // Cleared before the request runs.
        harness.write_artifact("stale");
        let dir = harness.client.locator().artifact_dir().to_path_buf();
        let result = harness
            .profile(|_connection| {
                fs::write(dir.join(format!("{ARTIFACT_PREFIX}fresh")), "{}").unwrap();
                Ok(instrumented("120.5", "80"))
            })
            .unwrap();

        assert_eq!(result.latency_ms, 120_500.0);
        assert_eq!(result.query_count, 80);
        assert_eq!(result.response_code, 200);
        assert_eq!(result.response_body, "body");
        assert_eq!(result.backtrace, None);
        assert!(result.server_memory_kb > 0);
        assert_eq!(
            result.profile_url,
            "http://127.0.0.1:3031/mini-profiler-resources/results?id=fresh"
        );
        assert_eq!(harness.finishes(), 1);
        assert_eq!(harness.connector.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_profile_reads_backtrace_file() {
        let mut harness = Harness::new();
        let backtrace = harness.dir.path().join("backtrace.txt");
        fs::write(&backtrace, "one\ntwo").unwrap();
        let dir = harness.client.locator().artifact_dir().to_path_buf();

        let result = harness
            .profile(|_connection| {
                fs::write(dir.join(format!("{ARTIFACT_PREFIX}bt")), "{}").unwrap();
                Ok(instrumented("0.25", "3")
                    .with_header(STACK_TRACE_HEADER, backtrace.display().to_string()))
            })
            .unwrap();

        assert_eq!(
            result.backtrace,
            Some(vec!["one".to_string(), "two".to_string()])
        );
        assert_eq!(result.latency_ms, 250.0);
    }

    #[test]
    fn test_unreadable_backtrace_reference_is_not_dropped() {
        let mut harness = Harness::new();
        let dir = harness.client.locator().artifact_dir().to_path_buf();

        let err = harness
            .profile(|_connection| {
                fs::write(dir.join(format!("{ARTIFACT_PREFIX}bt")), "{}").unwrap();
                Ok(instrumented("0.25", "3")
                    .with_header(STACK_TRACE_HEADER, "/nonexistent/bt\u{FFFD}.txt"))
            })
            .unwrap_err();

        assert!(matches!(err, ProfileError::Backtrace { .. }));
    }

    #[test]
    fn test_refused_inside_callback_is_connection_error() {
        let mut harness = Harness::new();

        let err = harness
            .profile(|_connection| {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into())
            })
            .unwrap_err();

        match err {
            ProfileError::Connection { addr, .. } => assert_eq!(addr, "127.0.0.1:3031"),
            other => panic!("expected connection error, got {other:?}"),
        }
        assert_eq!(harness.finishes(), 1);
    }

    #[test]
    fn test_callback_finishing_connection_is_not_finished_twice() {
        let mut harness = Harness::new();
        harness.write_artifact("ignored");
        let dir = harness.client.locator().artifact_dir().to_path_buf();

        harness
            .profile(|connection| {
                connection.finish();
                fs::write(dir.join(format!("{ARTIFACT_PREFIX}own")), "{}").unwrap();
                Ok(instrumented("1", "0"))
            })
            .unwrap();

        assert_eq!(harness.finishes(), 1);
    }

    #[test]
    fn test_panicking_callback_still_finishes_connection() {
        let mut harness = Harness::new();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = harness.profile(|_connection| panic!("request builder failed"));
        }));

        assert!(outcome.is_err());
        assert_eq!(harness.finishes(), 1);
    }

    #[test]
    fn test_missing_runtime_header_fails_loudly() {
        let mut harness = Harness::new();

        let err = harness
            .profile(|_connection| {
                Ok(RawResponse::new(200, "").with_header(QUERY_COUNT_HEADER, "1"))
            })
            .unwrap_err();

        assert!(matches!(
            err,
            ProfileError::MissingHeader {
                name: RUNTIME_HEADER
            }
        ));
        assert_eq!(harness.finishes(), 1);
    }

    #[test]
    fn test_invalid_query_count_fails_loudly() {
        let mut harness = Harness::new();

        let err = harness
            .profile(|_connection| Ok(instrumented("0.1", "many")))
            .unwrap_err();

        assert!(matches!(
            err,
            ProfileError::InvalidHeader {
                name: QUERY_COUNT_HEADER,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_artifact_is_artifact_error() {
        let mut harness = Harness::new();

        let err = harness
            .profile(|_connection| Ok(instrumented("0.1", "2")))
            .unwrap_err();

        assert!(matches!(err, ProfileError::Artifact(_)));
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_negative_runtime_is_invalid() {
        let response = instrumented("-1", "0");
        assert!(matches!(
            parse_runtime(&response),
            Err(ProfileError::InvalidHeader { .. })
        ));
    }
}
