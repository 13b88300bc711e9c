//! Target commands
//!
//! Every invocation builds a fresh controller; `attach` picks up a server
//! left running by an earlier invocation through its PID file.

use crate::ContextArgs;
use perfcheck_core::{ConfigError, EnvironmentContext, TargetConfig, TargetConfigBuilder};
use perfcheck_target::{BenchmarkTarget, ProcessError, ProfileError};
use reqwest::Method;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Load from `path` when given, then apply `PERFCHECK_*` overrides.
fn load_config(path: Option<&Path>) -> Result<TargetConfig, ConfigError> {
    let builder = match path {
        Some(path) => TargetConfigBuilder::from(TargetConfig::from_file(path)?),
        None => TargetConfigBuilder::new(),
    };
    builder.with_env_overrides()?.build()
}

fn environment_context(args: &ContextArgs) -> EnvironmentContext {
    EnvironmentContext::builder()
        .reference(args.reference)
        .verify_no_diff(args.verify_no_diff)
        .caching_enabled(!args.no_caching)
        .branch_env_vars(args.branch_env.iter().cloned())
        .reference_env_vars(args.reference_env.iter().cloned())
        .build()
}

fn open_target(
    config: Option<&Path>,
    context: EnvironmentContext,
) -> Result<BenchmarkTarget, CliError> {
    let config = load_config(config)?;
    let mut target = BenchmarkTarget::new(config, context);
    target.attach();
    Ok(target)
}

pub fn run_start(config: Option<&Path>, args: &ContextArgs) -> Result<(), CliError> {
    let mut target = open_target(config, environment_context(args))?;
    if target.is_running() {
        println!("✅ Target already running (pid {})", target.pid()?);
        return Ok(());
    }

    target.start()?;
    println!(
        "🚀 Started {} target on {}",
        target.context().side(),
        target.config().bind_address()
    );
    Ok(())
}

pub fn run_stop(config: Option<&Path>) -> Result<(), CliError> {
    let mut target = open_target(config, EnvironmentContext::default())?;
    if !target.is_running() {
        println!("Target is not running");
        return Ok(());
    }

    let pid = target.pid()?;
    target.exit()?;
    println!("🛑 Stopped target (pid {pid})");
    Ok(())
}

pub fn run_restart(config: Option<&Path>, args: &ContextArgs) -> Result<(), CliError> {
    let context = environment_context(args);
    let mut target = open_target(config, context.clone())?;
    target.restart(context)?;
    println!(
        "🔄 Restarted {} target on {}",
        target.context().side(),
        target.config().bind_address()
    );
    Ok(())
}

pub fn run_status(config: Option<&Path>) -> Result<(), CliError> {
    let target = open_target(config, EnvironmentContext::default())?;
    println!("{}", serde_json::to_string_pretty(&target.process())?);
    Ok(())
}

pub fn run_profile(
    config: Option<&Path>,
    args: &ContextArgs,
    path: &str,
    method: &str,
    headers: &[(String, String)],
) -> Result<(), CliError> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| ProfileError::Request(format!("invalid method '{method}': {e}")))?;
    let mut target = open_target(config, environment_context(args))?;

    let result = target.profile(|connection| {
        let mut request = connection.request(method, path)?;
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        connection.send(request)
    })?;

    eprintln!("📊 {}", result.summary());
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
