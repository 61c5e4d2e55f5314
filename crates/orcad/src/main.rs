//! orcad: the Orca orchestrator daemon.
//!
//! Single binary that assembles:
//! - State store (redb, one orcad per store file)
//! - Task registry with store-backed deployment locks
//! - Scaling coordinator
//! - Executor registry (kubernetes)
//! - Activity hooks (compute endpoint)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! orcad --config /etc/orca/orca.toml serve --listen 0.0.0.0:8800
//! orcad --config /etc/orca/orca.toml check-config
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use orca_api::{ApiState, build_router};
use orca_core::Configuration;
use orca_exec::{ExecutorRegistry, HttpClusterApi, KubernetesConfig, kubernetes};
use orca_state::{LockOptions, StateStore};
use orca_tasks::TaskRegistry;
use orca_workflow::{ComputeEndpointHook, HookRegistry};

#[derive(Parser)]
#[command(name = "orcad", about = "Orca orchestrator daemon", version)]
struct Cli {
    /// Path to orca.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Address to listen on; overrides `server.listen`.
        #[arg(long)]
        listen: Option<String>,

        /// Directory holding `orca.redb`; overrides `store.path`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep all state in memory (lost on exit).
        #[arg(long)]
        in_memory: bool,
    },
    /// Validate the configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            listen,
            data_dir,
            in_memory,
        } => serve(config, listen, data_dir, in_memory).await,
        Command::CheckConfig => check_config(&config),
    }
}

/// Filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "info,orcad=debug,orca=debug";

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Configuration> {
    match path {
        Some(path) => {
            let config = Configuration::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            Ok(config)
        }
        None => {
            info!("no configuration file given, using defaults");
            Ok(Configuration::default())
        }
    }
}

fn check_config(config: &Configuration) -> anyhow::Result<()> {
    LockOptions::try_from(&config.locks)?;
    if config.infrastructures.contains_key(kubernetes::INFRASTRUCTURE) {
        let k8s = KubernetesConfig::from_configuration(config)?;
        // Loads the TLS material too.
        HttpClusterApi::new(&k8s)?;
        println!(
            "kubernetes: {} ({})",
            k8s.master_url,
            if k8s.uses_tls() { "tls" } else { "plain http" }
        );
    }
    let mut names: Vec<&String> = config.infrastructures.keys().collect();
    names.sort();
    println!("infrastructures: {names:?}");
    println!("configuration OK");
    Ok(())
}

async fn serve(
    config: Configuration,
    listen: Option<String>,
    data_dir: Option<PathBuf>,
    in_memory: bool,
) -> anyhow::Result<()> {
    info!("Orca daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let store = if in_memory {
        info!("in-memory state store opened");
        StateStore::open_in_memory()?
    } else {
        let db_path = match data_dir {
            Some(dir) => dir.join("orca.redb"),
            None => config.store.path.clone(),
        };
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        store
    };

    // Task registry.
    let lock_options = LockOptions::try_from(&config.locks)?;
    let tasks = TaskRegistry::new(store).with_lock_options(lock_options);
    info!(ttl = ?lock_options.ttl, wait = ?lock_options.wait_timeout, "task registry initialized");

    // Executors.
    let executors = ExecutorRegistry::with_defaults();
    if config.infrastructures.contains_key(kubernetes::INFRASTRUCTURE) {
        if let Err(e) = KubernetesConfig::from_configuration(&config)
            .and_then(|k8s| HttpClusterApi::new(&k8s))
        {
            warn!(error = %e, "kubernetes operations will fail until the configuration is fixed");
        }
    }
    info!(infrastructures = ?executors.infrastructures(), "executors registered");

    // Post-activity hooks.
    let hooks = HookRegistry::builder()
        .register(ComputeEndpointHook::new())
        .build();
    info!(hooks = ?hooks.names(), "activity hooks registered");

    // ── Start API server ───────────────────────────────────────

    let listen = listen.unwrap_or_else(|| config.server.listen.clone());
    let state = ApiState::new(
        tasks,
        Arc::new(executors),
        Arc::new(hooks),
        Arc::new(config),
    );
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(addr = %listener.local_addr()?, "API server starting");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Orca daemon stopped");
    Ok(())
}
