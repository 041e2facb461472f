//! Relay execution and recovery core
//!
//! The orchestrator drives one task at a time: ask the oracle, dispatch the
//! tool calls it requests through the permission gate, checkpoint, repeat.
//! Long histories are compacted in place, failures are classified and either
//! retried, surfaced back to the oracle, or abort the task.

use thiserror::Error;

use relay_store::{ErrorEvent, StoreError, TaskStatus};

pub mod classifier;
pub mod compactor;
pub mod context;
pub mod orchestrator;
pub mod subagent;
pub mod tools;

pub use classifier::{classify_oracle_error, classify_tool_failure, RecoveryPolicy};
pub use compactor::Compactor;
pub use context::ContextBuilder;
pub use orchestrator::{Orchestrator, StatusReport};
pub use subagent::{SubAgentCoordinator, SubAgentKind, SubAgentResult, SubAgentSpec};
pub use tools::{ToolRegistry, ToolTrait};

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("state corruption in task {task_id}: {detail}")]
    StateCorruption { task_id: String, detail: String },

    #[error("task {0} cannot be resumed: {1}")]
    NotResumable(String, String),

    #[error("task {0} is already owned by another orchestrator")]
    TaskOwned(String),

    #[error("checkpoint store error: {0}")]
    Store(StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyOwned(task_id) => EngineError::TaskOwned(task_id),
            StoreError::Corrupt { task_id, detail } => {
                EngineError::StateCorruption { task_id, detail }
            }
            other => EngineError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Tunables for a single orchestrator run.
///
/// The CLI builds this from `relay_config::Config`; tests construct it
/// directly with tighter budgets.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Hard iteration budget before the task fails as exhausted
    pub max_iterations: u64,
    /// Iteration budget handed to spawned sub-agents
    pub subagent_max_iterations: u64,
    /// Raw-record count that triggers compaction
    pub compaction_threshold: u64,
    /// Trailing raw records compaction always leaves in place
    pub keep_recent: u64,
    /// Serialized active-history size that also triggers compaction
    pub max_active_bytes: usize,
    /// Automatic retries per transient failure
    pub max_retries: u32,
    /// Base backoff delay for transient retries, doubled per attempt
    pub retry_backoff_ms: u64,
    /// Wall-clock budget for a single tool invocation
    pub tool_timeout_secs: u64,
    /// Tool output beyond this is truncated with a marker
    pub max_tool_output_bytes: usize,
    /// Model identifier sent with every completion request; empty means use
    /// the oracle's default
    pub model: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let defaults = relay_config::EngineDefaults::default();
        Self {
            max_iterations: defaults.max_iterations,
            subagent_max_iterations: defaults.subagent_max_iterations,
            compaction_threshold: defaults.compaction_threshold,
            keep_recent: defaults.keep_recent,
            max_active_bytes: defaults.max_active_bytes,
            max_retries: defaults.max_retries,
            retry_backoff_ms: 500,
            tool_timeout_secs: defaults.tool_timeout_secs,
            max_tool_output_bytes: defaults.max_tool_output_bytes,
            model: String::new(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &relay_config::Config) -> Self {
        Self {
            max_iterations: config.engine.max_iterations,
            subagent_max_iterations: config.engine.subagent_max_iterations,
            compaction_threshold: config.engine.compaction_threshold,
            keep_recent: config.engine.keep_recent,
            max_active_bytes: config.engine.max_active_bytes,
            max_retries: config.engine.max_retries,
            retry_backoff_ms: 500,
            tool_timeout_secs: config.engine.tool_timeout_secs,
            max_tool_output_bytes: config.engine.max_tool_output_bytes,
            model: config.default_model(),
        }
    }

    /// Settings for a sub-agent run: same tunables, smaller iteration budget.
    pub fn for_subagent(&self) -> Self {
        Self {
            max_iterations: self.subagent_max_iterations,
            ..self.clone()
        }
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The oracle replied without tool calls
    OracleFinal,
    /// Iteration budget reached without a final reply
    BudgetExhausted,
    /// A fatal error aborted the task
    FatalError,
    /// Cancellation was requested; the task is resumable
    Paused,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::OracleFinal => "completed",
            StopReason::BudgetExhausted => "budget exhausted",
            StopReason::FatalError => "fatal error",
            StopReason::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

/// Outcome handed back to the caller when a run stops
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub stop_reason: StopReason,
    pub iterations: u64,
    /// Aggregated result summary when the task completed
    pub summary: Option<String>,
    /// Detail for fatal stops
    pub failure_detail: Option<String>,
    pub error_history: Vec<ErrorEvent>,
}
