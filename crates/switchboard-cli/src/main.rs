use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{CapabilityRegistry, IntentRouter, Orchestrator, default_patterns};
use switchboard_gateway::GatewayServer;
use switchboard_memory::{EntryKind, ExportFormat, MemoryStore};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::SwitchboardConfig;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Switchboard — multi-agent task dispatch")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Start the WebSocket broadcast server
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Route a single task and print the response
    Ask {
        /// The task text
        task: String,
    },

    /// Show system status
    Status,

    /// Inspect or maintain per-agent memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Replay an agent's log, oldest first
    Recall {
        agent: String,
        /// Keep only the most recent N entries
        #[arg(short, long)]
        limit: Option<usize>,
        /// Restrict to task_input or task_result
        #[arg(short = 't', long = "type")]
        kind: Option<String>,
    },

    /// Case-insensitive search over inputs and results
    Search {
        agent: String,
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Entry counts and time span, for one agent or all
    Stats { agent: Option<String> },

    /// Delete an agent's log
    Clear {
        agent: String,
        /// Actually delete; without this nothing happens
        #[arg(long)]
        confirm: bool,
    },

    /// Print the full log as JSON or CSV
    Export {
        agent: String,
        #[arg(short, long, default_value = "json")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Serve { bind } => cmd_serve(&cli.config, bind).await,
        Commands::Ask { task } => cmd_ask(&cli.config, &task).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Memory { command } => cmd_memory(&cli.config, command).await,
    }
}

/// Capability manifest and datasets bundled with the binary, installed by `init`
const BUNDLED_REGISTRY: &[(&str, &str)] = &[
    ("manifest.json", include_str!("../../../data/manifest.json")),
    (
        "datasets/blueprint.yaml",
        include_str!("../../../data/datasets/blueprint.yaml"),
    ),
    (
        "datasets/builder.json",
        include_str!("../../../data/datasets/builder.json"),
    ),
    (
        "datasets/builder_overrides.toml",
        include_str!("../../../data/datasets/builder_overrides.toml"),
    ),
    (
        "datasets/integrator.json",
        include_str!("../../../data/datasets/integrator.json"),
    ),
    (
        "datasets/scribe.toml",
        include_str!("../../../data/datasets/scribe.toml"),
    ),
];

/// Write the bundled registry under `dir`, leaving existing files untouched
async fn install_registry(dir: &Path) -> Result<()> {
    for (name, contents) in BUNDLED_REGISTRY {
        let path = dir.join(name);
        if path.exists() {
            debug!("Keeping existing {}", path.display());
            continue;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        info!("Created default config at {}", config_path.display());
    }

    let memory_dir = config_dir.join("memory");
    tokio::fs::create_dir_all(&memory_dir).await?;

    install_registry(&config_dir).await?;
    info!(
        "Installed capability manifest at {}",
        config_dir.join("manifest.json").display()
    );

    println!("Switchboard initialized at {}", config_dir.display());
    println!(
        "Edit {} to point [registry] at a different capability manifest.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

fn open_memory(cfg: &SwitchboardConfig) -> MemoryStore {
    MemoryStore::new(cfg.memory_dir(), cfg.memory.max_entries)
}

fn build_orchestrator(cfg: &SwitchboardConfig) -> Result<Orchestrator> {
    let registry = match cfg.manifest_path() {
        Some(path) => CapabilityRegistry::load(&path)
            .with_context(|| format!("Failed to load capability manifest {}", path.display()))?,
        None => {
            warn!(
                "No capability manifest configured; agents have no task templates. \
                 Run `switchboard init` or set [registry] manifest."
            );
            CapabilityRegistry::default()
        }
    };
    if registry.is_empty() {
        warn!("Capability registry is empty; every delegation falls back to generic results");
    } else {
        info!("Capability registry loaded for {} agents", registry.len());
    }

    let patterns = cfg
        .routing
        .patterns
        .clone()
        .unwrap_or_else(default_patterns);
    let router = IntentRouter::new(patterns, cfg.routing.fallback_agent.clone())
        .context("Invalid routing configuration")?;

    Ok(Orchestrator::simulated(
        Arc::new(registry),
        router,
        Arc::new(open_memory(cfg)),
        (&cfg.orchestrator).into(),
    ))
}

async fn cmd_serve(config_path: &Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let mut cfg = SwitchboardConfig::load(config_path)?;
    if let Some(bind) = bind {
        cfg.gateway.bind = bind;
    }
    let addr = cfg.gateway.bind_addr()?;
    info!("Starting switchboard...");

    let orchestrator = Arc::new(build_orchestrator(&cfg)?);
    let cancel = CancellationToken::new();

    // Log every completed task
    let mut notifications = orchestrator.subscribe();
    let notify_cancel = cancel.clone();
    let notify_loop = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = notify_cancel.cancelled() => break,
                received = notifications.recv() => match received {
                    Ok(response) => info!(
                        "Task {} completed by '{}' (confidence {:.2})",
                        response.task_id, response.agent, response.confidence
                    ),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Notification log lagged by {} tasks", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    let server = GatewayServer::new(
        addr,
        orchestrator.clone(),
        Duration::from_secs(cfg.gateway.handler_timeout_secs),
    );
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move { server.run(server_cancel).await });
    println!("Switchboard listening on ws://{}/ws (Ctrl+C to stop)", addr);

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    cancel.cancel();

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Gateway error: {}", e),
        Err(e) => error!("Gateway task panicked: {}", e),
    }
    let _ = notify_loop.await;

    println!("Switchboard stopped.");
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, task: &str) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let orchestrator = build_orchestrator(&cfg)?;
    let response = orchestrator.route_task(task, None).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn cmd_status(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let orchestrator = build_orchestrator(&cfg)?;
    let status = orchestrator.get_system_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_memory(config_path: &Option<PathBuf>, command: MemoryCommands) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let memory = open_memory(&cfg);

    match command {
        MemoryCommands::Recall { agent, limit, kind } => {
            let kind = kind
                .as_deref()
                .map(str::parse::<EntryKind>)
                .transpose()?;
            let entries = memory.recall(&agent, limit, kind).await;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        MemoryCommands::Search {
            agent,
            query,
            limit,
        } => {
            let entries = memory.search(&agent, &query, limit).await;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        MemoryCommands::Stats { agent } => match agent {
            Some(agent) => {
                let stats = memory.stats(&agent).await;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            None => {
                let stats = memory.all_stats().await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        },
        MemoryCommands::Clear { agent, confirm } => {
            if memory.clear(&agent, confirm).await? {
                println!("Cleared memory for '{}'.", agent);
            } else {
                println!("Nothing cleared. Re-run with --confirm to delete '{}' memory.", agent);
            }
        }
        MemoryCommands::Export { agent, format } => {
            let format: ExportFormat = format.parse()?;
            print!("{}", memory.export(&agent, format).await?);
        }
    }
    Ok(())
}
