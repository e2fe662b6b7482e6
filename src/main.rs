//! A2A Agent - Main Entry Point
//!
//! Runs the hello-world demo agent: `greet` and `calculate` capabilities,
//! plus `inventory` when a VTEX store is configured, reporting to LogAgent
//! when one is configured.

use a2a_agent::agent::{AgentBehavior, AgentRuntime, DefaultBehavior, LogAgentReporter};
use a2a_agent::capabilities::{calculate, greet, CapabilityRouter};
use a2a_agent::clients::{LogAgentClient, VtexClient};
use a2a_agent::config::AgentConfig;
use a2a_agent::error::AgentError;
use a2a_agent::observability::init_default_logging;
use a2a_agent::protocol::MessageAction;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Agent-to-agent protocol runtime
#[derive(Parser)]
#[command(name = "a2a-agent")]
#[command(about = "Agent-to-agent message protocol runtime over HTTP")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting A2A agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => ["agent.toml", "config/agent.toml"]
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or("No configuration file found. Provide one with -c/--config or create agent.toml")?,
    };

    info!("Loading configuration from: {}", path.display());
    let mut config = AgentConfig::load_from_file(&path)?;

    if let Ok(port) = std::env::var("AGENT_PORT") {
        config.server.port = port
            .parse()
            .map_err(|e| format!("Invalid AGENT_PORT '{port}': {e}"))?;
    }

    Ok(config)
}

async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(agent_id = %config.agent.id, "Application starting");

    let behavior = build_behavior(&config)?;
    let mut runtime = AgentRuntime::from_config(&config, behavior)?;
    runtime
        .handle()
        .register_handler(MessageAction::Request, Arc::new(build_capabilities(&config)?));

    let addr = runtime.start().await?;
    info!(%addr, "Agent ready");

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }

    runtime.stop().await?;
    Ok(())
}

fn build_behavior(config: &AgentConfig) -> Result<Arc<dyn AgentBehavior>, Box<dyn std::error::Error>> {
    let Some(log_agent) = &config.log_agent else {
        return Ok(Arc::new(DefaultBehavior));
    };

    let client = Arc::new(LogAgentClient::new(
        &log_agent.base_url,
        config.get_log_agent_api_key(),
    )?);
    let endpoint = std::env::var("AGENT_ENDPOINT")
        .unwrap_or_else(|_| format!("http://localhost:{}", config.server.port));

    info!(log_agent = %log_agent.base_url, %endpoint, "Reporting to LogAgent");
    Ok(Arc::new(LogAgentReporter::new(client, endpoint)))
}

fn build_capabilities(config: &AgentConfig) -> Result<CapabilityRouter, Box<dyn std::error::Error>> {
    let mut router = CapabilityRouter::new()
        .with("greet", Arc::new(greet))
        .with("calculate", Arc::new(calculate));

    if let Some(vtex) = &config.vtex {
        let (app_key, app_token) = config.get_vtex_credentials()?;
        let client = Arc::new(VtexClient::new(&vtex.store_url, app_key, app_token)?);
        router.register(
            "inventory",
            Arc::new(move |params: Value| {
                let client = client.clone();
                async move {
                    let sku = params
                        .get("skuId")
                        .and_then(Value::as_str)
                        .ok_or_else(|| AgentError::invalid_input("Missing 'skuId' parameter"))?;
                    Ok::<Value, AgentError>(client.get_inventory(sku).await?)
                }
            }),
        );
    }

    let advertised = &config.agent.capabilities;
    for name in router.capabilities() {
        if !advertised.contains(&name) {
            warn!(capability = %name, "Capability served but not listed in [agent].capabilities");
        }
    }

    Ok(router)
}

fn handle_config_command(config: &AgentConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
