//! Relay command implementations

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use relay_config::{self, Config};
use relay_engine::{EngineSettings, Orchestrator, RunOutcome, StopReason};
use relay_oracle::HttpOracle;
use relay_store::{CheckpointStore, PermissionTier, TaskStatus};

/// Initialize config and workspace
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing relay...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = relay_config::init().await?;

    println!("\n◆ Relay initialized");
    println!("Config:      {}", relay_config::config_path().display());
    println!("Workspace:   {}", relay_config::workspace_path().display());
    println!("Checkpoints: {}", config.checkpoints_dir().display());
    println!("\nNext steps:");
    println!("  1. Add your API key to ~/.relay/config.json");
    println!("     Get one at: https://openrouter.ai/keys");
    println!("  2. Start a task: relay start \"describe what to do\"");

    Ok(())
}

/// Build an orchestrator from the saved configuration
fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let api_key = config
        .api_key()
        .context("No API key configured. Set one in ~/.relay/config.json")?;

    let oracle = HttpOracle::new(
        api_key,
        config.oracle.api_base.clone(),
        Some(config.default_model()),
    );
    let store = CheckpointStore::new(config.checkpoints_dir());
    let settings = EngineSettings::from_config(config);

    Ok(Orchestrator::new(Arc::new(oracle), store, settings))
}

/// Cancel the run on Ctrl+C so the task checkpoints and pauses
fn watch_for_pause(orchestrator: &Orchestrator) {
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n◆ Pause requested, finishing the current step...");
            cancel.cancel();
        }
    });
}

/// Start a new task
pub async fn start_command(
    description: String,
    dir: Option<String>,
    permission: Option<String>,
) -> Result<()> {
    let config = Config::load().await?;
    let orchestrator = build_orchestrator(&config)?;

    let working_dir = match dir {
        Some(dir) => PathBuf::from(dir),
        None => relay_config::workspace_path(),
    };
    tokio::fs::create_dir_all(&working_dir).await?;

    let tier: PermissionTier = permission
        .unwrap_or_else(|| config.engine.permission_level.clone())
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    println!("◆ Starting task at tier {}", tier);
    println!("Working dir: {}", working_dir.display());
    println!("Press Ctrl+C to pause");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    watch_for_pause(&orchestrator);
    let outcome = orchestrator.start(description, working_dir, tier).await?;
    print_outcome(&outcome);

    Ok(())
}

/// Resume a paused or interrupted task
pub async fn resume_command(task_id: String) -> Result<()> {
    let config = Config::load().await?;
    let orchestrator = build_orchestrator(&config)?;

    println!("◆ Resuming task {}", task_id);
    println!("Press Ctrl+C to pause");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    watch_for_pause(&orchestrator);
    let outcome = orchestrator.resume(&task_id).await?;
    print_outcome(&outcome);

    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    println!();
    match outcome.stop_reason {
        StopReason::OracleFinal => {
            println!(
                "◆ Task {} completed after {} iterations",
                outcome.task_id, outcome.iterations
            );
            if let Some(summary) = &outcome.summary {
                println!("\n{}", summary);
            }
        }
        StopReason::Paused => {
            println!(
                "◆ Task {} paused after {} iterations",
                outcome.task_id, outcome.iterations
            );
            println!("Resume with: relay resume {}", outcome.task_id);
        }
        StopReason::BudgetExhausted => {
            println!(
                "✗ Task {} stopped: iteration budget exhausted after {} iterations",
                outcome.task_id, outcome.iterations
            );
        }
        StopReason::FatalError => {
            println!("✗ Task {} failed", outcome.task_id);
            if let Some(detail) = &outcome.failure_detail {
                println!("  {}", detail);
            }
        }
    }

    if !outcome.error_history.is_empty() {
        println!(
            "\n{} error event(s) recorded; last:",
            outcome.error_history.len()
        );
        for event in outcome.error_history.iter().rev().take(3).rev() {
            println!(
                "  [{}] {}: {}",
                event.seq,
                event.tool.as_deref().unwrap_or("oracle"),
                event.detail
            );
        }
    }
}

/// Show the state of a task
pub async fn status_command(task_id: String) -> Result<()> {
    let config = Config::load().await?;
    let store = CheckpointStore::new(config.checkpoints_dir());
    let snapshot = store.load(&task_id).await?;

    println!("◆ Task {}", snapshot.task.task_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Description: {}", snapshot.task.description);
    println!("Status:      {}", status_label(snapshot.task.status));
    println!("Permission:  {}", snapshot.task.permission_level);
    println!("Iterations:  {}", snapshot.iteration_count);
    println!("Working dir: {}", snapshot.task.working_dir.display());
    println!(
        "Created:     {}",
        snapshot.task.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    let done = snapshot
        .todos
        .iter()
        .filter(|t| t.status == relay_store::TodoStatus::Done)
        .count();
    if !snapshot.todos.is_empty() {
        println!("Todos:       {}/{} done", done, snapshot.todos.len());
        for todo in &snapshot.todos {
            println!("  [{:?}] {}", todo.status, todo.description);
        }
    }
    if !snapshot.files.is_empty() {
        println!("Files touched:");
        for (path, entry) in &snapshot.files {
            println!("  {} ({})", path, entry.action);
        }
    }
    if !snapshot.error_history.is_empty() {
        println!("Errors:      {}", snapshot.error_history.len());
    }
    if let Some(summary) = snapshot.last_summary() {
        println!(
            "\nLast summary (iterations {}-{}):",
            summary.from_seq, summary.to_seq
        );
        println!("{}", summary.narrative);
    }

    Ok(())
}

/// List all known tasks
pub async fn list_command() -> Result<()> {
    let config = Config::load().await?;
    let store = CheckpointStore::new(config.checkpoints_dir());

    let ids = store.list().await;
    if ids.is_empty() {
        println!("No tasks");
        return Ok(());
    }

    println!("◆ Tasks");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for id in ids {
        match store.load(&id).await {
            Ok(snapshot) => {
                println!(
                    "  {}  [{}]  iter {}  {}",
                    snapshot.task.task_id,
                    status_label(snapshot.task.status),
                    snapshot.iteration_count,
                    excerpt(&snapshot.task.description),
                );
            }
            Err(e) => {
                println!("  {}  [unreadable: {}]", id, e);
            }
        }
    }

    Ok(())
}

/// Delete a task's checkpoint
pub async fn delete_command(task_id: String) -> Result<()> {
    let config = Config::load().await?;
    let store = CheckpointStore::new(config.checkpoints_dir());

    if store.delete(&task_id).await? {
        println!("✓ Task {} deleted", task_id);
    } else {
        println!("✗ Task {} not found", task_id);
    }

    Ok(())
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Running => "running",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

fn excerpt(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > 60 {
        let truncated: String = line.chars().take(57).collect();
        format!("{}...", truncated)
    } else {
        line.to_string()
    }
}
