//! Standalone entrypoint wiring the default collaborators (§6.1) into a
//! `Manager` and running it to completion or until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use integration_supervisor::config::{AgentFeatures, SupervisorConfig, Verbosity};
use integration_supervisor::defaults::{
    EnvIdLookup, JsonFileLoader, PathInstancesLookup, ProcessExecutor, StdoutEmitter,
};
use integration_supervisor::manager::Manager;
use integration_supervisor::obfuscate::SubstringObfuscator;
use tokio_util::sync::CancellationToken;

/// Executes, observes, and dynamically reconfigures externally-supplied
/// integration processes.
#[derive(Parser, Debug)]
#[command(name = "integration-supervisor", about, version)]
struct Cli {
    /// Directory or file watched for hot-reloadable integration configs.
    #[arg(long = "config-path", value_name = "PATH")]
    config_paths: Vec<PathBuf>,

    /// Directory or file loaded once at startup, not watched.
    #[arg(long = "definition-path", value_name = "PATH")]
    definition_paths: Vec<PathBuf>,

    /// Environment variable name forwarded into every launched child.
    #[arg(long = "passthrough-env", value_name = "NAME")]
    passthrough_env: Vec<String>,

    /// Verbosity level injected into child environments as `VERBOSE`.
    #[arg(long, default_value_t = 0)]
    verbose: u8,

    /// Run every single-run definition once and exit, instead of starting
    /// the watcher and request pump (§4.9.3).
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let config = SupervisorConfig {
        config_paths: cli.config_paths,
        definition_paths: cli.definition_paths,
        passthrough_env: cli.passthrough_env,
        verbosity: Verbosity(cli.verbose),
        agent_features: AgentFeatures::new(),
        watcher_debounce: Duration::from_millis(250),
    };

    let manager = Arc::new(
        Manager::new(
            config.clone(),
            Arc::new(JsonFileLoader),
            Arc::new(ProcessExecutor::new(config.passthrough_env.clone())),
            Arc::new(PathInstancesLookup),
            Arc::new(StdoutEmitter),
            Arc::new(EnvIdLookup),
            Arc::new(SubstringObfuscator::default()),
        )
        .await?,
    );

    let scope = CancellationToken::new();

    if cli.once {
        manager.run_once(scope).await;
        return Ok(());
    }

    manager.start(scope.clone()).await;

    tokio::signal::ctrl_c().await?;
    scope.cancel();
    Ok(())
}
