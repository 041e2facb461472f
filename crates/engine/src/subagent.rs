//! Bounded sub-agent delegation
//!
//! A sub-agent is a fresh orchestrator run over a narrower task: its own
//! task id, its own checkpoints, a smaller iteration budget, and a
//! permission tier capped by the parent's. Only the summary and artifact
//! list flow back into the parent's history, so delegation never inflates
//! the parent context. Sub-agents cannot delegate further.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_oracle::Oracle;
use relay_store::{CheckpointStore, PermissionTier, TaskStatus};

use crate::orchestrator::Orchestrator;
use crate::{EngineSettings, Result, StopReason};

/// What kind of work a sub-agent is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentKind {
    Search,
    Analysis,
    Modification,
    Creation,
}

impl SubAgentKind {
    /// Highest tier this kind of work needs on its own merits; the parent's
    /// tier caps it further
    pub fn default_tier(&self) -> PermissionTier {
        match self {
            SubAgentKind::Search | SubAgentKind::Analysis => PermissionTier::Safe,
            SubAgentKind::Modification | SubAgentKind::Creation => PermissionTier::Elevated,
        }
    }

    /// Kind-specific framing prepended to the delegated description
    fn preamble(&self) -> &'static str {
        match self {
            SubAgentKind::Search => {
                "You are a focused search agent. Locate the requested information and report \
                 findings. Do not modify anything."
            }
            SubAgentKind::Analysis => {
                "You are a focused analysis agent. Examine the requested material and report \
                 conclusions. Do not modify anything."
            }
            SubAgentKind::Modification => {
                "You are a focused modification agent. Make the requested changes, verify them, \
                 and report exactly what changed."
            }
            SubAgentKind::Creation => {
                "You are a focused creation agent. Produce the requested files or content and \
                 report what was created."
            }
        }
    }
}

impl FromStr for SubAgentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "search" => Ok(SubAgentKind::Search),
            "analysis" => Ok(SubAgentKind::Analysis),
            "modification" => Ok(SubAgentKind::Modification),
            "creation" => Ok(SubAgentKind::Creation),
            other => Err(format!(
                "unknown sub-agent kind '{}', expected search, analysis, modification or creation",
                other
            )),
        }
    }
}

impl std::fmt::Display for SubAgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubAgentKind::Search => "search",
            SubAgentKind::Analysis => "analysis",
            SubAgentKind::Modification => "modification",
            SubAgentKind::Creation => "creation",
        };
        write!(f, "{}", s)
    }
}

/// One delegated sub-task
#[derive(Debug, Clone)]
pub struct SubAgentSpec {
    pub description: String,
    pub kind: SubAgentKind,
    pub working_dir: PathBuf,
    pub parent_level: PermissionTier,
}

/// What flows back to the parent when a sub-agent finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub task_id: String,
    pub kind: SubAgentKind,
    pub success: bool,
    pub summary: String,
    /// Files the sub-agent created or modified
    pub artifacts: Vec<String>,
}

/// Spawns and joins sub-agent runs
#[derive(Clone)]
pub struct SubAgentCoordinator {
    oracle: Arc<dyn Oracle>,
    store: CheckpointStore,
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl SubAgentCoordinator {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        store: CheckpointStore,
        settings: EngineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            oracle,
            store,
            settings,
            cancel,
        }
    }

    /// Run one sub-agent to completion and collapse its run into a result
    pub async fn spawn(&self, spec: SubAgentSpec) -> Result<SubAgentResult> {
        let tier = spec.kind.default_tier().min(spec.parent_level);
        let description = format!("{}\n\nTask: {}", spec.kind.preamble(), spec.description);

        info!(
            "spawning {} sub-agent at tier {} (parent tier {})",
            spec.kind, tier, spec.parent_level
        );

        let orchestrator = Orchestrator::new(
            Arc::clone(&self.oracle),
            self.store.clone(),
            self.settings.clone(),
        )
        .with_cancellation(self.cancel.child_token())
        .without_delegation();

        let outcome = orchestrator
            .start(description, spec.working_dir, tier)
            .await?;

        let artifacts = match self.store.load(&outcome.task_id).await {
            Ok(snapshot) => snapshot.files.keys().cloned().collect(),
            Err(err) => {
                warn!(
                    "could not read sub-agent checkpoint {}: {}",
                    outcome.task_id, err
                );
                Vec::new()
            }
        };

        let summary = match (&outcome.summary, outcome.stop_reason) {
            (Some(summary), _) => summary.clone(),
            (None, StopReason::Paused) => "sub-agent was paused before finishing".to_string(),
            (None, reason) => format!(
                "sub-agent stopped without a result: {}{}",
                reason,
                outcome
                    .failure_detail
                    .as_deref()
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default()
            ),
        };

        Ok(SubAgentResult {
            task_id: outcome.task_id,
            kind: spec.kind,
            success: outcome.status == TaskStatus::Completed,
            summary,
            artifacts,
        })
    }

    /// Run several sub-agents concurrently and join them all, preserving
    /// input order. A panicked run becomes a failed result rather than
    /// taking the parent down.
    pub async fn spawn_many(&self, specs: Vec<SubAgentSpec>) -> Vec<Result<SubAgentResult>> {
        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            let coordinator = self.clone();
            handles.push(tokio::spawn(
                async move { coordinator.spawn(spec).await },
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    warn!("sub-agent run panicked: {}", join_err);
                    results.push(Err(crate::EngineError::StateCorruption {
                        task_id: "<subagent>".to_string(),
                        detail: join_err.to_string(),
                    }));
                }
            }
        }
        results
    }
}
