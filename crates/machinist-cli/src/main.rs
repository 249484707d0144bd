use anyhow::Context;
use clap::{Parser, Subcommand};
use machinist_agents::AgentRegistry;
use machinist_orchestrator::{Engine, EngineConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "machinist", about = "Machinist: orchestration engine for machining computations")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "machinist.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered agents
    Agents,
    /// List swarm coordination patterns
    Patterns,
    /// Run one façade action and print the JSON reply
    Dispatch {
        /// Action name, e.g. agent_execute or swarm_consensus
        action: String,
        /// Inline JSON parameters
        #[arg(long, conflicts_with = "params_file")]
        params: Option<String>,
        /// Read JSON parameters from a file
        #[arg(long)]
        params_file: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the engine config, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(EngineConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config = EngineConfig::from_toml_str(&raw)?;
    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

fn build_engine(config: EngineConfig) -> anyhow::Result<Engine> {
    let registry = Arc::new(AgentRegistry::new());
    if config.registry.builtins {
        machinist_builtins::register_builtins(&registry);
    }
    Ok(Engine::with_registry(config, registry)?)
}

fn read_params(inline: Option<String>, file: Option<PathBuf>) -> anyhow::Result<Value> {
    let raw = match (inline, file) {
        (Some(raw), _) => raw,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read params file '{}'", path.display()))?,
        (None, None) => return Ok(Value::Null),
    };
    serde_json::from_str(&raw).context("params must be valid JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }

    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = load_config(&cli.config)?;
    let engine = build_engine(config)?;

    match cli.command {
        Commands::Agents => {
            let agents = engine.registry().all();
            if agents.is_empty() {
                println!("No agents registered.");
                println!("Enable the reference agents with `builtins = true` under [registry]");
            } else {
                println!("Registered agents:");
                for agent in &agents {
                    let enabled = if agent.enabled { "" } else { " (disabled)" };
                    println!(
                        "  {:<24} {:<10} {:<10} {}{enabled}",
                        agent.id,
                        agent.category,
                        agent.status.to_string(),
                        agent.name
                    );
                }
                println!("\nTotal: {} agent(s)", agents.len());
            }
        }
        Commands::Patterns => {
            for pattern in engine.swarms().patterns() {
                println!("  {:<14} {}", pattern.name, pattern.description);
            }
        }
        Commands::Dispatch {
            action,
            params,
            params_file,
        } => {
            let params = read_params(params, params_file)?;
            let reply = engine.dispatch(&action, params).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            if reply.get("error").is_some_and(|e| !e.is_null()) {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
