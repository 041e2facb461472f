//! Relay - resumable task execution agent

use clap::{Parser, Subcommand};
use tracing::error;

mod commands;

use commands::{
    delete_command, init_command, list_command, resume_command, start_command, status_command,
};

/// Relay - a resumable agent for long-running tasks
#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "◆ A resumable task execution agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and workspace
    Init,
    /// Start a new task
    Start {
        /// What the task should accomplish
        description: String,
        /// Working directory for the task (defaults to the relay workspace)
        #[arg(short, long)]
        dir: Option<String>,
        /// Permission tier: safe, elevated or admin
        #[arg(short, long)]
        permission: Option<String>,
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Resume a paused or interrupted task
    Resume {
        /// Task ID to resume
        task_id: String,
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show the state of a task
    Status {
        /// Task ID to inspect
        task_id: String,
    },
    /// List all known tasks
    List,
    /// Delete a task's checkpoint
    Delete {
        /// Task ID to delete
        task_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbose = matches!(
        cli.command,
        Commands::Start { verbose: true, .. } | Commands::Resume { verbose: true, .. }
    );
    if verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt::init();
    }

    match cli.command {
        Commands::Init => {
            if let Err(e) = init_command().await {
                error!("Init failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Start {
            description,
            dir,
            permission,
            verbose: _,
        } => {
            if let Err(e) = start_command(description, dir, permission).await {
                error!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Resume {
            task_id,
            verbose: _,
        } => {
            if let Err(e) = resume_command(task_id).await {
                error!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Status { task_id } => {
            if let Err(e) = status_command(task_id).await {
                error!("Status failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::List => {
            if let Err(e) = list_command().await {
                error!("List failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Delete { task_id } => {
            if let Err(e) = delete_command(task_id).await {
                error!("Delete failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
