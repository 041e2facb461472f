//! Tool registry and permission gate

pub mod filesystem;
pub mod path_utils;
pub mod shell;
pub mod spawn;
pub mod todo;

pub use filesystem::{EditFileTool, ListDirTool, ReadFileTool, RemoveFileTool, WriteFileTool};
pub use shell::ExecTool;
pub use spawn::SpawnAgentTool;
pub use todo::UpdateTodosTool;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use relay_oracle::{ToolCall, ToolSignature};
use relay_store::{PermissionTier, ToolResult};

type BoxedTool = Box<dyn ToolTrait + Send + Sync>;

#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    /// Minimum permission tier a task needs for this tool to execute
    fn tier(&self) -> PermissionTier;
    /// Tools that carry their own deadline (a delegated run is bounded by
    /// its iteration budget) opt out of the registry timeout
    fn bypasses_timeout(&self) -> bool {
        false
    }
    async fn execute(
        &self,
        args: Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

pub fn signature_of(tool: &dyn ToolTrait) -> ToolSignature {
    ToolSignature::new(tool.name(), tool.description(), tool.parameters())
}

/// Tool registry. Every dispatch goes through [`ToolRegistry::invoke`],
/// which checks the task's permission tier before executing, bounds the
/// call with a timeout and truncates oversized output.
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ToolRegistry {
    pub fn new(timeout_secs: u64, max_output_bytes: usize) -> Self {
        Self {
            tools: HashMap::new(),
            timeout: Duration::from_secs(timeout_secs),
            max_output_bytes,
        }
    }

    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&(dyn ToolTrait + Send + Sync)> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Signatures advertised to the oracle
    pub fn signatures(&self) -> Vec<ToolSignature> {
        let mut signatures: Vec<ToolSignature> = self
            .tools
            .values()
            .map(|t| signature_of(t.as_ref()))
            .collect();
        signatures.sort_by(|a, b| a.name.cmp(&b.name));
        signatures
    }

    /// Dispatch one gated tool call on behalf of a task running at `level`.
    ///
    /// Fails closed: a call whose tool requires a higher tier than the task
    /// holds is rejected without executing anything. Tool failures come back
    /// as failed [`ToolResult`]s rather than errors so the loop can decide
    /// what to do with them.
    pub async fn invoke(&self, call: &ToolCall, level: PermissionTier) -> ToolResult {
        let started = Instant::now();

        let tool = match self.tools.get(&call.name) {
            Some(tool) => tool,
            None => {
                warn!("unknown tool requested: {}", call.name);
                return ToolResult::failure(
                    format!("tool '{}' not found", call.name),
                    elapsed_ms(started),
                );
            }
        };

        let required = tool.tier();
        if required > level {
            warn!(
                "permission denied: {} requires {} but task runs at {}",
                call.name, required, level
            );
            return ToolResult::failure(
                format!(
                    "permission denied: '{}' requires {} but this task runs at {}",
                    call.name, required, level
                ),
                elapsed_ms(started),
            );
        }

        debug!("invoking tool {} at tier {}", call.name, level);
        if tool.bypasses_timeout() {
            return match tool.execute(call.arguments.clone()).await {
                Ok(output) => {
                    let output = truncate_output(output, self.max_output_bytes);
                    ToolResult::ok(output, elapsed_ms(started))
                }
                Err(e) => ToolResult::failure(e.to_string(), elapsed_ms(started)),
            };
        }

        match tokio::time::timeout(self.timeout, tool.execute(call.arguments.clone())).await {
            Ok(Ok(output)) => {
                let output = truncate_output(output, self.max_output_bytes);
                ToolResult::ok(output, elapsed_ms(started))
            }
            Ok(Err(e)) => ToolResult::failure(e.to_string(), elapsed_ms(started)),
            Err(_) => ToolResult::failure(
                format!(
                    "tool '{}' timed out after {} seconds",
                    call.name,
                    self.timeout.as_secs()
                ),
                elapsed_ms(started),
            ),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Cap tool output at `max_bytes`, appending a marker with the amount cut.
/// The cut lands on a char boundary so multibyte output never splits.
fn truncate_output(output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }

    let mut cut = max_bytes;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }

    format!(
        "{}\n[output truncated: {} bytes omitted]",
        &output[..cut],
        output.len() - cut
    )
}

/// Register the working-directory tools every task gets
pub fn register_default_tools(registry: &mut ToolRegistry, working_dir: &std::path::Path) {
    registry.register(ReadFileTool::new(working_dir.to_path_buf()));
    registry.register(WriteFileTool::new(working_dir.to_path_buf()));
    registry.register(EditFileTool::new(working_dir.to_path_buf()));
    registry.register(ListDirTool::new(working_dir.to_path_buf()));
    registry.register(RemoveFileTool::new(working_dir.to_path_buf()));
    registry.register(ExecTool::new(working_dir.to_path_buf()));
}
