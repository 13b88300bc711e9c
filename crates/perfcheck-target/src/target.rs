//! One benchmark target: a server process plus the client that profiles it,
//! driven by the environment context of the current run.

use crate::connection::{Connector, RawResponse};
use crate::error::{ProcessError, ProfileError};
use crate::http::HttpConnector;
use crate::process::{ProcessController, ServerProcess};
use crate::profiling::ProfilingClient;
use perfcheck_core::{EnvironmentContext, ProfileResult, TargetConfig};
use tracing::info;

#[derive(Debug)]
pub struct BenchmarkTarget<C: Connector = HttpConnector> {
    controller: ProcessController,
    client: ProfilingClient<C>,
    context: EnvironmentContext,
}

impl BenchmarkTarget<HttpConnector> {
    pub fn new(config: TargetConfig, context: EnvironmentContext) -> Self {
        Self::with_connector(config, context, HttpConnector)
    }
}

impl<C: Connector> BenchmarkTarget<C> {
    pub fn with_connector(config: TargetConfig, context: EnvironmentContext, connector: C) -> Self {
        let client = ProfilingClient::with_connector(&config, connector);
        Self {
            controller: ProcessController::new(config),
            client,
            context,
        }
    }

    pub fn config(&self) -> &TargetConfig {
        self.controller.config()
    }

    pub fn context(&self) -> &EnvironmentContext {
        &self.context
    }

    /// Replace the context used by later starts. A running server keeps its
    /// environment until restarted.
    pub fn set_context(&mut self, context: EnvironmentContext) {
        self.context = context;
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    pub fn client(&self) -> &ProfilingClient<C> {
        &self.client
    }

    /// Start the server with the current context.
    ///
    /// # Errors
    ///
    /// See [`ProcessController::start`].
    pub fn start(&mut self) -> Result<(), ProcessError> {
        self.controller.start(&self.context)
    }

    /// # Errors
    ///
    /// See [`ProcessController::exit`].
    pub fn exit(&mut self) -> Result<(), ProcessError> {
        self.controller.exit()
    }

    /// Switch to `context` and restart the server under it.
    ///
    /// # Errors
    ///
    /// See [`ProcessController::restart`].
    pub fn restart(&mut self, context: EnvironmentContext) -> Result<(), ProcessError> {
        info!(from = %self.context.side(), to = %context.side(), "restarting benchmark target");
        self.context = context;
        self.controller.restart(&self.context)
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    /// # Errors
    ///
    /// Returns `ProcessError::NotRunning` without a readable PID file.
    pub fn pid(&self) -> Result<u32, ProcessError> {
        self.controller.pid()
    }

    /// Resident memory of the running server in kilobytes.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::NotRunning` or `ProcessError::Lookup`.
    pub fn memory_kb(&self) -> Result<u64, ProcessError> {
        let pid = self.controller.pid()?;
        self.controller.mem(pid)
    }

    pub fn process(&self) -> ServerProcess {
        self.controller.process()
    }

    /// See [`ProcessController::attach`].
    pub fn attach(&mut self) -> bool {
        self.controller.attach()
    }

    /// Profile one request, starting the server first if needed.
    ///
    /// # Errors
    ///
    /// See [`ProfilingClient::profile`].
    pub fn profile<F>(&mut self, request_fn: F) -> Result<ProfileResult, ProfileError>
    where
        F: FnOnce(&mut C::Connection) -> Result<RawResponse, ProfileError>,
    {
        self.client
            .profile(&mut self.controller, &self.context, request_fn)
    }
}
