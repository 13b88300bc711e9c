//! Profiling round trips over HTTP against an instrumented wiremock target

use perfcheck_core::{EnvironmentContext, TargetConfig};
use perfcheck_target::{
    ArtifactError, ProcessController, ProfileError, ProfilingClient, RUNTIME_HEADER,
};
use perfcheck_testing::{AppFixture, InstrumentedServer, InstrumentedServerBuilder};
use reqwest::Method;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

/// An app root whose "server" is the test process itself, profiled through
/// an instrumented wiremock target.
struct Setup {
    app: AppFixture,
    server: InstrumentedServer,
    config: TargetConfig,
}

impl Setup {
    fn new() -> Self {
        Self::with(InstrumentedServer::builder())
    }

    fn with(builder: InstrumentedServerBuilder) -> Self {
        let app = AppFixture::new();
        app.write_pid(std::process::id());
        let config = app.config().build().unwrap();
        let server = builder.start(config.artifact_dir_path(), app.root());
        let config = app
            .config()
            .host(server.host())
            .port(server.port())
            .read_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        Self {
            app,
            server,
            config,
        }
    }

    fn attached_controller(&self) -> ProcessController {
        let mut controller = ProcessController::new(self.config.clone());
        assert!(controller.attach());
        controller
    }
}

#[test]
fn test_profile_get_request() {
    let setup = Setup::with(
        InstrumentedServer::builder()
            .runtime("0.120")
            .query_count("12")
            .body("<html>users</html>"),
    );
    let client = ProfilingClient::new(&setup.config);
    let mut controller = setup.attached_controller();

    let result = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/users?page=2")?)
        })
        .unwrap();

    assert_eq!(result.latency_ms, 120.0);
    assert_eq!(result.query_count, 12);
    assert_eq!(result.response_code, 200);
    assert_eq!(result.response_body, "<html>users</html>");
    assert_eq!(result.backtrace, None);
    assert!(result.server_memory_kb > 0);
    assert_eq!(
        result.profile_url,
        format!(
            "http://{}:{}/mini-profiler-resources/results?id=req1",
            setup.server.host(),
            setup.server.port()
        )
    );
    assert!(
        setup
            .config
            .published_artifact_dir_path()
            .join("mp_timers_req1")
            .is_file()
    );
    assert_eq!(setup.server.received(), vec!["GET /users?page=2"]);
}

#[test]
fn test_profile_custom_request() {
    let setup = Setup::new();
    let client = ProfilingClient::new(&setup.config);
    let mut controller = setup.attached_controller();

    let result = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            let request = connection
                .request(Method::POST, "/orders")?
                .header("X-Request-Tag", "perfcheck")
                .body("{}");
            connection.send(request)
        })
        .unwrap();

    assert_eq!(result.latency_ms, 42.0);
    assert_eq!(setup.server.received(), vec!["POST /orders"]);
    assert_eq!(
        setup.server.received_header("X-Request-Tag"),
        vec![Some("perfcheck".to_string())]
    );
}

#[test]
fn test_profile_reports_backtrace() {
    let setup = Setup::with(InstrumentedServer::builder().backtrace(["one", "two"]));
    let client = ProfilingClient::new(&setup.config);
    let mut controller = setup.attached_controller();

    let result = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/")?)
        })
        .unwrap();

    assert_eq!(
        result.backtrace,
        Some(vec!["one".to_string(), "two".to_string()])
    );
}

#[test]
fn test_error_status_is_still_a_result() {
    let setup = Setup::with(InstrumentedServer::builder().status(500).body("boom"));
    let client = ProfilingClient::new(&setup.config);
    let mut controller = setup.attached_controller();

    let result = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/explode")?)
        })
        .unwrap();

    assert_eq!(result.response_code, 500);
    assert_eq!(result.response_body, "boom");
    assert!(!result.is_success());
}

#[test]
fn test_uninstrumented_response_fails_loudly() {
    let setup = Setup::with(InstrumentedServer::builder().without_runtime());
    let client = ProfilingClient::new(&setup.config);
    let mut controller = setup.attached_controller();

    let err = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/")?)
        })
        .unwrap_err();

    assert!(matches!(
        err,
        ProfileError::MissingHeader {
            name: RUNTIME_HEADER
        }
    ));
    assert!(!err.is_infrastructure());
}

#[test]
fn test_missing_artifact_is_surfaced() {
    let setup = Setup::with(InstrumentedServer::builder().without_artifact());
    let client = ProfilingClient::new(&setup.config);
    let mut controller = setup.attached_controller();

    let err = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/")?)
        })
        .unwrap_err();

    assert!(matches!(
        err,
        ProfileError::Artifact(ArtifactError::NotFound { .. })
    ));
}

#[test]
fn test_stale_artifacts_are_cleared_between_requests() {
    let setup = Setup::new();
    let client = ProfilingClient::new(&setup.config);
    let mut controller = setup.attached_controller();
    setup
        .app
        .write_file("tmp/perf_check/miniprofiler/mp_timers_stale", "{}");

    let first = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/a")?)
        })
        .unwrap();
    let second = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/b")?)
        })
        .unwrap();

    assert!(first.profile_url.ends_with("id=req1"));
    assert!(second.profile_url.ends_with("id=req2"));
    assert_eq!(setup.server.request_count(), 2);
}

#[test]
fn test_refused_connection_is_connection_error() {
    let app = AppFixture::new();
    app.write_pid(std::process::id());
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = app.config().port(port).build().unwrap();
    let client = ProfilingClient::new(&config);
    let mut controller = ProcessController::new(config);
    assert!(controller.attach());

    let err = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/")?)
        })
        .unwrap_err();

    match &err {
        ProfileError::Connection { addr, .. } => assert_eq!(addr, &format!("127.0.0.1:{port}")),
        other => panic!("expected connection error, got {other:?}"),
    }
    assert!(err.is_infrastructure());
}

#[test]
fn test_read_timeout_bounds_the_request() {
    let setup = Setup::with(InstrumentedServer::builder().delay(Duration::from_secs(3)));
    let config = TargetConfig {
        read_timeout: Duration::from_millis(200),
        ..setup.config.clone()
    };
    let client = ProfilingClient::new(&config);
    let mut controller = setup.attached_controller();

    let err = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/slow")?)
        })
        .unwrap_err();

    assert!(matches!(err, ProfileError::Timeout { .. }));
    assert!(err.is_infrastructure());
}

#[test]
fn test_malformed_runtime_header_is_invalid_not_missing() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf);
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nX-Runtime: 0.1\xff\r\nX-PerfCheck-Query-Count: 3\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .unwrap();
    });

    let app = AppFixture::new();
    app.write_pid(std::process::id());
    let config = app.config().port(port).build().unwrap();
    let client = ProfilingClient::new(&config);
    let mut controller = ProcessController::new(config);
    assert!(controller.attach());

    let err = client
        .profile(&mut controller, &EnvironmentContext::default(), |connection| {
            connection.send(connection.get("/")?)
        })
        .unwrap_err();
    server.join().unwrap();

    assert!(matches!(
        err,
        ProfileError::InvalidHeader {
            name: RUNTIME_HEADER,
            ..
        }
    ));
    assert!(!err.is_infrastructure());
}
