use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod target;

use target::{run_profile, run_restart, run_start, run_status, run_stop};

#[derive(Parser, Debug)]
#[command(name = "perfcheck", version)]
#[command(about = "perfcheck - control and profile a benchmark target server")]
struct Cli {
    /// Target configuration file (TOML, or JSON by extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the target server
    Start {
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Stop a running target server
    Stop,
    /// Stop the target server if running, then launch it again
    Restart {
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Print the target server state as JSON
    Status,
    /// Profile one request against the target, starting it if needed
    Profile {
        /// Request path, e.g. /users?page=2
        path: String,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
        /// Extra request header (repeatable)
        #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[command(flatten)]
        context: ContextArgs,
    },
}

/// Options describing which side of a comparison to launch.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// Launch the reference side instead of the branch
    #[arg(long)]
    pub reference: bool,
    /// Ask the target to verify responses do not differ between sides
    #[arg(long)]
    pub verify_no_diff: bool,
    /// Disable application caching in the target
    #[arg(long)]
    pub no_caching: bool,
    /// Variable for branch runs (repeatable)
    #[arg(long = "branch-env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub branch_env: Vec<(String, String)>,
    /// Variable for reference runs (repeatable)
    #[arg(long = "reference-env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub reference_env: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME:VALUE, got '{raw}'")),
    }
}

fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let outcome = match cli.command {
        Commands::Start { context } => run_start(config, &context),
        Commands::Stop => run_stop(config),
        Commands::Restart { context } => run_restart(config, &context),
        Commands::Status => run_status(config),
        Commands::Profile {
            path,
            method,
            headers,
            context,
        } => run_profile(config, &context, &path, &method, &headers),
    };

    if let Err(e) = outcome {
        tracing::error!(error = %e, "perfcheck command failed");
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}
