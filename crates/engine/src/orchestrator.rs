//! Task orchestrator
//!
//! Owns one task at a time and drives it to a terminal state: build the
//! conversation from the checkpoint, ask the oracle, dispatch the requested
//! tool calls through the permission gate, record the iteration, checkpoint,
//! repeat. Every iteration boundary is durable, so a crash or pause at any
//! point loses at most the iteration in flight.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_oracle::{CompletionRequest, Oracle, ToolCall};
use relay_store::{
    CheckpointSnapshot, CheckpointStore, ErrorEvent, ErrorKind, FileEntry, HistoryItem,
    IterationOutcome, IterationRecord, PermissionTier, RecoveryAction, RecoveryContext, StoreError,
    Task, TaskStatus, TodoItem, TodoStatus, ToolExchange, ToolResult,
};

use crate::classifier::{classify_oracle_error, classify_tool_failure, RecoveryPolicy};
use crate::compactor::Compactor;
use crate::context::ContextBuilder;
use crate::subagent::SubAgentCoordinator;
use crate::tools::{self, SpawnAgentTool, ToolRegistry, UpdateTodosTool};
use crate::{EngineError, EngineSettings, Result, RunOutcome, StopReason};

/// Read-only view of a task's stored state
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub task_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub iteration_count: u64,
    pub permission_level: PermissionTier,
    pub open_todos: usize,
    pub done_todos: usize,
    pub error_count: usize,
    pub last_summary: Option<String>,
}

/// Drives tasks against one oracle and one checkpoint store
pub struct Orchestrator {
    oracle: Arc<dyn Oracle>,
    store: CheckpointStore,
    settings: EngineSettings,
    cancel: CancellationToken,
    allow_delegation: bool,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, store: CheckpointStore, settings: EngineSettings) -> Self {
        Self {
            oracle,
            store,
            settings,
            cancel: CancellationToken::new(),
            allow_delegation: true,
        }
    }

    /// Use an externally held token so the caller can pause the run
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sub-agents run without a spawn tool, which bounds delegation depth
    pub(crate) fn without_delegation(mut self) -> Self {
        self.allow_delegation = false;
        self
    }

    /// Token that pauses the running task when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a task and run it to a terminal state
    pub async fn start(
        &self,
        description: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        permission_level: PermissionTier,
    ) -> Result<RunOutcome> {
        let task = Task::new(description, working_dir, permission_level);
        info!(
            "starting task {} at tier {}",
            task.task_id, task.permission_level
        );
        let snapshot = CheckpointSnapshot::new(task);
        self.drive(snapshot).await
    }

    /// Continue a paused or interrupted task from its last checkpoint
    pub async fn resume(&self, task_id: &str) -> Result<RunOutcome> {
        let snapshot = match self.store.load(task_id).await {
            Ok(snapshot) => snapshot,
            Err(StoreError::NotFound(id)) => {
                return Err(EngineError::NotResumable(id, "no checkpoint found".into()))
            }
            Err(err) => return Err(err.into()),
        };

        if snapshot.task.status.is_terminal() {
            return Err(EngineError::NotResumable(
                task_id.to_string(),
                format!("task already {:?}", snapshot.task.status).to_lowercase(),
            ));
        }

        info!(
            "resuming task {} at iteration {}",
            task_id, snapshot.iteration_count
        );
        self.drive(snapshot).await
    }

    /// Inspect a task without taking ownership of it
    pub async fn status(&self, task_id: &str) -> Result<StatusReport> {
        let snapshot = self.store.load(task_id).await?;
        Ok(StatusReport {
            task_id: snapshot.task.task_id.clone(),
            description: snapshot.task.description.clone(),
            status: snapshot.task.status,
            iteration_count: snapshot.iteration_count,
            permission_level: snapshot.task.permission_level,
            open_todos: snapshot
                .todos
                .iter()
                .filter(|t| t.status != TodoStatus::Done)
                .count(),
            done_todos: snapshot
                .todos
                .iter()
                .filter(|t| t.status == TodoStatus::Done)
                .count(),
            error_count: snapshot.error_history.len(),
            last_summary: snapshot.last_summary().map(|s| s.narrative.clone()),
        })
    }

    async fn drive(&self, mut snapshot: CheckpointSnapshot) -> Result<RunOutcome> {
        let task_id = snapshot.task.task_id.clone();
        let _guard = self.store.acquire(&task_id)?;

        let level = snapshot.task.permission_level;
        let todos = Arc::new(Mutex::new(snapshot.todos.clone()));
        let registry = self.build_registry(&snapshot.task, Arc::clone(&todos));
        let builder = ContextBuilder::new(&snapshot.task);
        let compactor = Compactor::new(
            self.settings.compaction_threshold,
            self.settings.keep_recent,
            self.settings.max_active_bytes,
        );
        let policy = RecoveryPolicy::new(
            self.settings.max_retries,
            Duration::from_millis(self.settings.retry_backoff_ms),
        );
        let model = if self.settings.model.is_empty() {
            self.oracle.default_model()
        } else {
            self.settings.model.clone()
        };

        snapshot.task.status = TaskStatus::Running;
        let mut oracle_attempts = snapshot
            .recovery
            .as_ref()
            .map(|r| r.attempts)
            .unwrap_or(0);
        self.store.save(&snapshot).await?;

        loop {
            if self.cancel.is_cancelled() {
                return self.finish(snapshot, &todos, TaskStatus::Paused, StopReason::Paused, None, None)
                    .await;
            }

            if snapshot.iteration_count >= self.settings.max_iterations {
                warn!(
                    "task {} exhausted its budget of {} iterations",
                    task_id, self.settings.max_iterations
                );
                return self
                    .finish(
                        snapshot,
                        &todos,
                        TaskStatus::Failed,
                        StopReason::BudgetExhausted,
                        None,
                        Some(format!(
                            "iteration budget of {} exhausted",
                            self.settings.max_iterations
                        )),
                    )
                    .await;
            }

            if compactor.compact(&mut snapshot) {
                self.store.save(&snapshot).await?;
            }

            let seq = snapshot.next_seq();
            debug!("task {} iteration {}", task_id, seq);

            // Derived from the last stored record, so it survives a pause or
            // crash between iterations.
            let pending = escalation_note(&snapshot);

            let request = CompletionRequest {
                model: model.clone(),
                messages: builder.build_messages(&snapshot, pending.as_deref()),
                signatures: registry.signatures(),
                ..Default::default()
            };

            let reply = match self.oracle.complete(request).await {
                Ok(reply) => {
                    oracle_attempts = 0;
                    snapshot.recovery = None;
                    reply
                }
                Err(err) => {
                    let kind = classify_oracle_error(&err);
                    let action = match kind {
                        ErrorKind::Transient => policy.decide(kind, oracle_attempts),
                        _ => RecoveryAction::Abort,
                    };
                    snapshot.error_history.push(ErrorEvent {
                        kind,
                        tool: None,
                        detail: err.to_string(),
                        seq,
                        action,
                        timestamp: Local::now(),
                    });

                    match action {
                        RecoveryAction::Retry { attempt } => {
                            warn!(
                                "oracle failure on iteration {} (retry {}): {}",
                                seq, attempt, err
                            );
                            oracle_attempts = attempt;
                            snapshot.recovery = Some(RecoveryContext {
                                seq,
                                tool: "oracle".to_string(),
                                attempts: attempt,
                                detail: err.to_string(),
                            });
                            self.store.save(&snapshot).await?;
                            tokio::time::sleep(policy.backoff(attempt)).await;
                            continue;
                        }
                        RecoveryAction::Escalate | RecoveryAction::Abort => {
                            error!("oracle failure aborts task {}: {}", task_id, err);
                            snapshot.recovery = None;
                            return self
                                .finish(
                                    snapshot,
                                    &todos,
                                    TaskStatus::Failed,
                                    StopReason::FatalError,
                                    None,
                                    Some(err.to_string()),
                                )
                                .await;
                        }
                    }
                }
            };

            if reply.is_final() {
                let final_text = reply.final_text();
                snapshot.active_history.push(HistoryItem::Record(IterationRecord {
                    seq,
                    request: pending.unwrap_or_default(),
                    reply: Some(final_text.clone()),
                    tool_exchanges: Vec::new(),
                    timestamp: Local::now(),
                    outcome: IterationOutcome::Ok,
                }));
                snapshot.iteration_count = seq;

                info!("task {} completed after {} iterations", task_id, seq);
                let summary = aggregate(&snapshot, &final_text);
                return self
                    .finish(
                        snapshot,
                        &todos,
                        TaskStatus::Completed,
                        StopReason::OracleFinal,
                        Some(summary),
                        None,
                    )
                    .await;
            }

            let mut exchanges = Vec::new();
            let mut outcome = IterationOutcome::Ok;
            let mut fatal: Option<String> = None;

            for call in &reply.tool_calls {
                if fatal.is_some() || self.cancel.is_cancelled() {
                    // Undispatched calls still get a recorded result so the
                    // replayed conversation stays well formed on resume.
                    exchanges.push(ToolExchange {
                        call: call.clone(),
                        result: ToolResult::failure("not executed: iteration interrupted", 0),
                    });
                    if fatal.is_none() {
                        outcome = IterationOutcome::UserAbort;
                    }
                    continue;
                }

                let mut attempts = 0u32;
                let result = loop {
                    let result = registry.invoke(call, level).await;
                    if result.success {
                        break result;
                    }

                    let detail = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "tool failed".to_string());
                    let kind = classify_tool_failure(&detail);
                    let action = policy.decide(kind, attempts);
                    snapshot.error_history.push(ErrorEvent {
                        kind,
                        tool: Some(call.name.clone()),
                        detail: detail.clone(),
                        seq,
                        action,
                        timestamp: Local::now(),
                    });

                    match action {
                        RecoveryAction::Retry { attempt } => {
                            warn!(
                                "transient failure in {} (retry {}): {}",
                                call.name, attempt, detail
                            );
                            attempts = attempt;
                            tokio::time::sleep(policy.backoff(attempt)).await;
                        }
                        RecoveryAction::Escalate => {
                            debug!("surfacing {} failure to the oracle: {}", call.name, detail);
                            outcome = IterationOutcome::ToolError;
                            break result;
                        }
                        RecoveryAction::Abort => {
                            error!("fatal failure in {}: {}", call.name, detail);
                            outcome = IterationOutcome::ToolError;
                            fatal = Some(detail);
                            break result;
                        }
                    }
                };

                self.track_file(&mut snapshot, call, &result).await;
                exchanges.push(ToolExchange {
                    call: call.clone(),
                    result,
                });
            }

            snapshot.active_history.push(HistoryItem::Record(IterationRecord {
                seq,
                request: pending.unwrap_or_default(),
                reply: reply.content.clone(),
                tool_exchanges: exchanges,
                timestamp: Local::now(),
                outcome,
            }));
            snapshot.iteration_count = seq;
            snapshot.todos = current_todos(&todos);
            self.store.save(&snapshot).await?;

            if let Some(detail) = fatal {
                return self
                    .finish(
                        snapshot,
                        &todos,
                        TaskStatus::Failed,
                        StopReason::FatalError,
                        None,
                        Some(detail),
                    )
                    .await;
            }
        }
    }

    async fn finish(
        &self,
        mut snapshot: CheckpointSnapshot,
        todos: &Arc<Mutex<Vec<TodoItem>>>,
        status: TaskStatus,
        stop_reason: StopReason,
        summary: Option<String>,
        failure_detail: Option<String>,
    ) -> Result<RunOutcome> {
        snapshot.task.status = status;
        snapshot.todos = current_todos(todos);
        self.store.save(&snapshot).await?;

        if status == TaskStatus::Paused {
            info!(
                "task {} paused at iteration {}",
                snapshot.task.task_id, snapshot.iteration_count
            );
        }

        Ok(RunOutcome {
            task_id: snapshot.task.task_id,
            status,
            stop_reason,
            iterations: snapshot.iteration_count,
            summary,
            failure_detail,
            error_history: snapshot.error_history,
        })
    }

    fn build_registry(&self, task: &Task, todos: Arc<Mutex<Vec<TodoItem>>>) -> ToolRegistry {
        let mut registry = ToolRegistry::new(
            self.settings.tool_timeout_secs,
            self.settings.max_tool_output_bytes,
        );
        tools::register_default_tools(&mut registry, &task.working_dir);
        registry.register(UpdateTodosTool::new(todos));

        if self.allow_delegation {
            let coordinator = SubAgentCoordinator::new(
                Arc::clone(&self.oracle),
                self.store.clone(),
                self.settings.for_subagent(),
                self.cancel.child_token(),
            );
            registry.register(SpawnAgentTool::new(
                coordinator,
                task.working_dir.clone(),
                task.permission_level,
            ));
        }

        registry
    }

    /// Keep the file ledger current from successful mutating calls
    async fn track_file(
        &self,
        snapshot: &mut CheckpointSnapshot,
        call: &ToolCall,
        result: &ToolResult,
    ) {
        if !result.success {
            return;
        }
        let action = match call.name.as_str() {
            "write_file" => {
                if call
                    .arguments
                    .get("path")
                    .and_then(|v| v.as_str())
                    .map(|p| snapshot.files.contains_key(p))
                    .unwrap_or(false)
                {
                    "modified"
                } else {
                    "created"
                }
            }
            "edit_file" => "modified",
            "remove_file" => "deleted",
            _ => return,
        };
        let path = match call.arguments.get("path").and_then(|v| v.as_str()) {
            Some(path) => path.to_string(),
            None => return,
        };

        let size = if action == "deleted" {
            0
        } else {
            let resolved = snapshot.task.working_dir.join(&path);
            tokio::fs::metadata(&resolved)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        };

        snapshot.files.insert(
            path,
            FileEntry {
                action: action.to_string(),
                size,
                touched_at: Local::now(),
            },
        );
    }
}

/// Nudge for the next round when the previous recorded iteration had tool
/// failures that were surfaced rather than retried
fn escalation_note(snapshot: &CheckpointSnapshot) -> Option<String> {
    let record = snapshot
        .active_history
        .iter()
        .rev()
        .find_map(|item| match item {
            HistoryItem::Record(record) => Some(record),
            HistoryItem::Summary(_) => None,
        })?;

    if record.outcome != IterationOutcome::ToolError {
        return None;
    }

    let failed: Vec<&str> = record
        .tool_exchanges
        .iter()
        .filter(|e| !e.result.success)
        .map(|e| e.call.name.as_str())
        .collect();
    if failed.is_empty() {
        return None;
    }

    Some(format!(
        "Tool calls failed in the last round: {}. Review the errors and take a \
         different approach.",
        failed.join(", ")
    ))
}

fn current_todos(todos: &Arc<Mutex<Vec<TodoItem>>>) -> Vec<TodoItem> {
    todos.lock().map(|t| t.clone()).unwrap_or_default()
}

/// Concise completion summary built from the whole task, not just the
/// trailing window
fn aggregate(snapshot: &CheckpointSnapshot, final_text: &str) -> String {
    let mut parts = vec![final_text.to_string()];

    let mut facts = vec![format!("{} iterations", snapshot.iteration_count)];
    if !snapshot.files.is_empty() {
        let paths: Vec<&str> = snapshot.files.keys().map(|s| s.as_str()).collect();
        facts.push(format!("files touched: {}", paths.join(", ")));
    }
    let done = snapshot
        .todos
        .iter()
        .filter(|t| t.status == TodoStatus::Done)
        .count();
    if !snapshot.todos.is_empty() {
        facts.push(format!("todos done: {}/{}", done, snapshot.todos.len()));
    }
    if !snapshot.error_history.is_empty() {
        facts.push(format!(
            "{} recorded error events",
            snapshot.error_history.len()
        ));
    }

    parts.push(format!("({})", facts.join("; ")));
    parts.join("\n\n")
}
