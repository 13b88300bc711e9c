//! # Instrumented HTTP Target
//!
//! A wiremock server standing in for an instrumented application. Every
//! request it serves writes a profiler artifact (`mp_timers_req<n>`) into the
//! configured artifact directory and answers with the profiling headers,
//! optionally pointing `X-PerfCheck-StackTrace` at a freshly written
//! backtrace file.
//!
//! The server runs on wiremock's own thread; the fixture only keeps a small
//! runtime around to drive wiremock's async setup API, so tests using it stay
//! plain synchronous `#[test]` functions.

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// What every instrumented response carries.
#[derive(Debug, Clone)]
pub struct ResponseProfile {
    pub status: u16,
    pub body: String,
    /// Sent verbatim as `X-Runtime`; `None` omits the header
    pub runtime: Option<String>,
    /// Sent verbatim as `X-PerfCheck-Query-Count`; `None` omits the header
    pub query_count: Option<String>,
    pub backtrace: Option<Vec<String>>,
    pub write_artifact: bool,
    pub delay: Option<Duration>,
}

impl Default for ResponseProfile {
    fn default() -> Self {
        Self {
            status: 200,
            body: "ok".to_string(),
            runtime: Some("0.042".to_string()),
            query_count: Some("7".to_string()),
            backtrace: None,
            write_artifact: true,
            delay: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct InstrumentedServerBuilder {
    profile: ResponseProfile,
}

impl InstrumentedServerBuilder {
    pub fn status(mut self, status: u16) -> Self {
        self.profile.status = status;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.profile.body = body.into();
        self
    }

    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.profile.runtime = Some(runtime.into());
        self
    }

    pub fn without_runtime(mut self) -> Self {
        self.profile.runtime = None;
        self
    }

    pub fn query_count(mut self, query_count: impl Into<String>) -> Self {
        self.profile.query_count = Some(query_count.into());
        self
    }

    pub fn backtrace<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profile.backtrace = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Serve responses without leaving a profiler artifact.
    pub fn without_artifact(mut self) -> Self {
        self.profile.write_artifact = false;
        self
    }

    /// Hold every response back for `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.profile.delay = Some(delay);
        self
    }

    /// Start serving; artifacts land in `artifact_dir`, backtrace files in
    /// `scratch_dir`.
    pub fn start(
        self,
        artifact_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
    ) -> InstrumentedServer {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build fixture runtime");
        let requests = Arc::new(AtomicUsize::new(0));

        let responder = ProfilingResponder {
            profile: self.profile,
            artifact_dir: artifact_dir.into(),
            scratch_dir: scratch_dir.into(),
            requests: Arc::clone(&requests),
        };

        let server = runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(any())
                .respond_with(responder)
                .mount(&server)
                .await;
            server
        });

        InstrumentedServer {
            server,
            runtime,
            requests,
        }
    }
}

/// A running instrumented target.
pub struct InstrumentedServer {
    // Dropped before the runtime
    server: MockServer,
    runtime: Runtime,
    requests: Arc<AtomicUsize>,
}

impl InstrumentedServer {
    pub fn builder() -> InstrumentedServerBuilder {
        InstrumentedServerBuilder::default()
    }

    /// Start with the default [`ResponseProfile`].
    pub fn start(artifact_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self::builder().start(artifact_dir, scratch_dir)
    }

    pub fn host(&self) -> String {
        self.server.address().ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.server.address().port()
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// `METHOD /path?query` of every request received so far.
    pub fn received(&self) -> Vec<String> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
            .iter()
            .map(|request| {
                let url = &request.url;
                match url.query() {
                    Some(query) => format!("{} {}?{}", request.method, url.path(), query),
                    None => format!("{} {}", request.method, url.path()),
                }
            })
            .collect()
    }

    /// Value of header `name` on every request received so far.
    pub fn received_header(&self, name: &str) -> Vec<Option<String>> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
            .iter()
            .map(|request| {
                request
                    .headers
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
            })
            .collect()
    }
}

impl std::fmt::Debug for InstrumentedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedServer")
            .field("uri", &self.server.uri())
            .field("requests", &self.request_count())
            .finish()
    }
}

struct ProfilingResponder {
    profile: ResponseProfile,
    artifact_dir: PathBuf,
    scratch_dir: PathBuf,
    requests: Arc<AtomicUsize>,
}

impl ProfilingResponder {
    fn write_artifact(&self, n: usize, request: &Request) {
        let artifact = json!({
            "id": format!("req{n}"),
            "method": request.method.to_string(),
            "path": request.url.path(),
            "runtime": self.profile.runtime,
        });
        write(
            &self.artifact_dir.join(format!("mp_timers_req{n}")),
            &artifact.to_string(),
        );
    }

    fn write_backtrace(&self, n: usize, lines: &[String]) -> PathBuf {
        let path = self.scratch_dir.join(format!("backtrace_{n}.txt"));
        write(&path, &lines.join("\n"));
        path
    }
}

impl Respond for ProfilingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if self.profile.write_artifact {
            self.write_artifact(n, request);
        }

        let mut template =
            ResponseTemplate::new(self.profile.status).set_body_string(self.profile.body.clone());
        if let Some(runtime) = &self.profile.runtime {
            template = template.insert_header("X-Runtime", runtime.as_str());
        }
        if let Some(query_count) = &self.profile.query_count {
            template = template.insert_header("X-PerfCheck-Query-Count", query_count.as_str());
        }
        if let Some(lines) = &self.profile.backtrace {
            let path = self.write_backtrace(n, lines);
            template =
                template.insert_header("X-PerfCheck-StackTrace", path.display().to_string());
        }
        if let Some(delay) = self.profile.delay {
            template = template.set_delay(delay);
        }
        template
    }
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture directory");
    }
    fs::write(path, content).expect("write fixture file");
}
