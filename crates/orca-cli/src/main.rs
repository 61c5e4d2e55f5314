use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;

use client::ApiClient;
use commands::deployments::Scale;

#[derive(Parser)]
#[command(
    name = "orca",
    about = "Orca application lifecycle orchestrator",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Base URL of the orcad REST API.
    #[arg(long, default_value = "http://127.0.0.1:8800", global = true)]
    api: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and cancel tasks
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },
    /// Lifecycle operations on deployments
    Deployments {
        #[command(subcommand)]
        action: DeploymentsAction,
    },
}

#[derive(Subcommand)]
enum TasksAction {
    /// Print the id, status and type of a task
    Info {
        deployment_id: String,
        task_id: String,
    },
    /// Cancel a running task
    Cancel {
        deployment_id: String,
        task_id: String,
    },
}

#[derive(Subcommand)]
enum DeploymentsAction {
    /// Undeploy an application
    Undeploy {
        deployment_id: String,
        /// Purge the deployment instead of undeploying it.
        #[arg(short, long)]
        purge: bool,
    },
    /// Add or remove instances of a node
    Scale {
        deployment_id: String,
        node: String,
        /// Instances to add.
        #[arg(long, conflicts_with = "remove", required_unless_present = "remove")]
        add: Option<u32>,
        /// Instances to remove.
        #[arg(long)]
        remove: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orca=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api)?;

    let output = match cli.command {
        Commands::Tasks { action } => match action {
            TasksAction::Info {
                deployment_id,
                task_id,
            } => commands::tasks::info(&client, &deployment_id, &task_id).await?,
            TasksAction::Cancel {
                deployment_id,
                task_id,
            } => commands::tasks::cancel(&client, &deployment_id, &task_id).await?,
        },
        Commands::Deployments { action } => match action {
            DeploymentsAction::Undeploy {
                deployment_id,
                purge,
            } => commands::deployments::undeploy(&client, &deployment_id, purge).await?,
            DeploymentsAction::Scale {
                deployment_id,
                node,
                add,
                remove,
            } => {
                let request = match (add, remove) {
                    (Some(n), _) => Scale::Add(n),
                    (None, Some(n)) => Scale::Remove(n),
                    (None, None) => anyhow::bail!("you need to provide --add or --remove"),
                };
                commands::deployments::scale(&client, &deployment_id, &node, request).await?
            }
        },
    };
    println!("{output}");
    Ok(())
}
