//! Sub-agent delegation tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use relay_store::PermissionTier;

use crate::subagent::{SubAgentCoordinator, SubAgentKind, SubAgentSpec};

use super::ToolTrait;

/// Delegate a focused sub-task to a bounded sub-agent and wait for it.
///
/// The tool itself is safe to call at any tier; the sub-agent's own tier is
/// capped by the parent's, so delegation can never escalate privileges.
pub struct SpawnAgentTool {
    coordinator: SubAgentCoordinator,
    working_dir: PathBuf,
    parent_level: PermissionTier,
}

impl SpawnAgentTool {
    pub fn new(
        coordinator: SubAgentCoordinator,
        working_dir: PathBuf,
        parent_level: PermissionTier,
    ) -> Self {
        Self {
            coordinator,
            working_dir,
            parent_level,
        }
    }
}

#[derive(Deserialize)]
struct SpawnArgs {
    description: String,
    kind: String,
}

#[async_trait]
impl ToolTrait for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }
    fn description(&self) -> &str {
        "Delegate a focused sub-task to a sub-agent and wait for its summary. \
         Kinds: search, analysis, modification, creation."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "description": { "type": "string", "description": "Self-contained description of the sub-task" },
                "kind": { "type": "string", "enum": ["search", "analysis", "modification", "creation"] }
            },
            "required": ["description", "kind"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Safe
    }
    fn bypasses_timeout(&self) -> bool {
        true
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: SpawnArgs = serde_json::from_value(args)?;
        let kind: SubAgentKind = args.kind.parse()?;

        let result = self
            .coordinator
            .spawn(SubAgentSpec {
                description: args.description,
                kind,
                working_dir: self.working_dir.clone(),
                parent_level: self.parent_level,
            })
            .await?;

        Ok(serde_json::to_string_pretty(&result)?)
    }
}
