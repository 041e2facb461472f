//! Resumable task state
//!
//! Everything a task needs to continue at the next iteration boundary after a
//! crash, pause, or version upgrade. All types are serde-schematized; fields
//! added after version 1 must carry `#[serde(default)]` so snapshots written
//! by older builds stay loadable, and unknown fields from newer builds are
//! ignored on load.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use relay_oracle::ToolCall;

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 1;

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

fn now() -> DateTime<Local> {
    Local::now()
}

/// Admission-control tier gating tool execution
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    #[default]
    Safe,
    Elevated,
    Admin,
}

impl FromStr for PermissionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(PermissionTier::Safe),
            "elevated" => Ok(PermissionTier::Elevated),
            "admin" => Ok(PermissionTier::Admin),
            other => Err(format!("unknown permission tier: {}", other)),
        }
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionTier::Safe => "safe",
            PermissionTier::Elevated => "elevated",
            PermissionTier::Admin => "admin",
        };
        write!(f, "{}", s)
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A task owned by exactly one orchestrator instance at a time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque stable identifier, generated once, never reused
    pub task_id: String,
    /// Original description, immutable after creation
    pub description: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Local>,
    pub status: TaskStatus,
    pub permission_level: PermissionTier,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        permission_level: PermissionTier,
    ) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            working_dir: working_dir.into(),
            created_at: Local::now(),
            status: TaskStatus::Running,
            permission_level,
        }
    }
}

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Ok,
    ToolError,
    OracleError,
    UserAbort,
}

/// Outcome of one gated tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: format!("Error: {}", error),
            error: Some(error),
            duration_ms,
        }
    }
}

/// A dispatched call paired with its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// One round of the execution loop. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Monotonic and gapless within a task, starting at 1
    pub seq: u64,
    /// Incremental user-side input for this round (task prompt, escalation
    /// note), empty when the round only continues from tool results
    #[serde(default)]
    pub request: String,
    /// Narrative content of the oracle reply, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default)]
    pub tool_exchanges: Vec<ToolExchange>,
    pub timestamp: DateTime<Local>,
    pub outcome: IterationOutcome,
}

/// Compacted replacement for a contiguous range of iteration records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Inclusive range of sequence numbers this summary replaces
    pub from_seq: u64,
    pub to_seq: u64,
    pub narrative: String,
    pub created_at: DateTime<Local>,
}

/// Active-history element: summaries first, then trailing raw records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryItem {
    Summary(Summary),
    Record(IterationRecord),
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Network/timeout; eligible for bounded automatic retry
    Transient,
    /// Fails closed, surfaced to the caller, never retried
    Permission,
    /// Missing dependency or precondition; surfaced to the oracle
    Environment,
    /// Corruption or invariant violation; aborts the task
    Fatal,
}

/// The recovery decision taken for an error event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry { attempt: u32 },
    Escalate,
    Abort,
}

/// A classified failure and the action chosen for it.
///
/// Error events survive compaction verbatim; summaries reference them, never
/// replace them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub detail: String,
    pub seq: u64,
    pub action: RecoveryAction,
    pub timestamp: DateTime<Local>,
}

/// Open recovery state carried across a checkpoint taken mid-recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub seq: u64,
    pub tool: String,
    pub attempts: u32,
    pub detail: String,
}

/// Todo entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
}

/// Ordered todo entry tracked in task state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub description: String,
    pub status: TodoStatus,
}

/// Last-known metadata for a file touched by the task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// "created", "modified" or "deleted"
    pub action: String,
    pub size: u64,
    pub touched_at: DateTime<Local>,
}

/// The full resumable state of a task at an iteration boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub task: Task,
    pub iteration_count: u64,
    /// Summaries plus trailing raw records, oldest first
    pub active_history: Vec<HistoryItem>,
    /// Raw records evicted by compaction, kept addressable for audit
    #[serde(default)]
    pub archive: Vec<IterationRecord>,
    /// Never truncated by compaction
    #[serde(default)]
    pub error_history: Vec<ErrorEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryContext>,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    #[serde(default = "now")]
    pub saved_at: DateTime<Local>,
}

impl CheckpointSnapshot {
    pub fn new(task: Task) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            task,
            iteration_count: 0,
            active_history: Vec::new(),
            archive: Vec::new(),
            error_history: Vec::new(),
            recovery: None,
            todos: Vec::new(),
            files: Vec::new().into_iter().collect(),
            saved_at: Local::now(),
        }
    }

    /// Structural validation run on every load and save.
    ///
    /// Guarantees the resume contract: sequence numbers are strictly
    /// increasing and gapless across summaries and records, summaries are
    /// disjoint and precede all raw records, and the iteration count matches
    /// the last covered sequence number.
    pub fn validate(&self) -> Result<(), String> {
        if self.version == 0 {
            return Err("snapshot version 0 is not valid".to_string());
        }

        let mut expected: u64 = 1;
        let mut seen_record = false;

        for item in &self.active_history {
            match item {
                HistoryItem::Summary(summary) => {
                    if seen_record {
                        return Err(format!(
                            "summary [{}, {}] appears after raw records",
                            summary.from_seq, summary.to_seq
                        ));
                    }
                    if summary.from_seq != expected {
                        return Err(format!(
                            "summary starts at {} but expected {}",
                            summary.from_seq, expected
                        ));
                    }
                    if summary.to_seq < summary.from_seq {
                        return Err(format!(
                            "summary range [{}, {}] is inverted",
                            summary.from_seq, summary.to_seq
                        ));
                    }
                    expected = summary.to_seq + 1;
                }
                HistoryItem::Record(record) => {
                    seen_record = true;
                    if record.seq != expected {
                        return Err(format!(
                            "record seq {} but expected {}",
                            record.seq, expected
                        ));
                    }
                    expected = record.seq + 1;
                }
            }
        }

        let last_covered = expected - 1;
        if self.iteration_count != last_covered {
            return Err(format!(
                "iteration count {} does not match history end {}",
                self.iteration_count, last_covered
            ));
        }

        Ok(())
    }

    /// Next iteration sequence number
    pub fn next_seq(&self) -> u64 {
        self.iteration_count + 1
    }

    /// Most recent summary narrative, if one exists
    pub fn last_summary(&self) -> Option<&Summary> {
        self.active_history.iter().rev().find_map(|item| match item {
            HistoryItem::Summary(s) => Some(s),
            HistoryItem::Record(_) => None,
        })
    }
}
