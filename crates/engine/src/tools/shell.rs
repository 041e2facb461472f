//! Shell command tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use relay_store::PermissionTier;

use super::path_utils::confine_to_working_dir;
use super::ToolTrait;

/// Commands matching these run with the extended timeout; package
/// installation and builds routinely exceed the per-call default.
const SLOW_COMMAND_MARKERS: &[&str] = &[
    "install",
    "build",
    "compile",
    "download",
    "clone",
    "update",
    "upgrade",
];

/// Run a shell command in the task working directory
pub struct ExecTool {
    timeout_secs: u64,
    extended_timeout_secs: u64,
    working_dir: PathBuf,
}

impl ExecTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            timeout_secs: 60,
            extended_timeout_secs: 300,
            working_dir,
        }
    }

    pub fn with_timeouts(working_dir: PathBuf, timeout_secs: u64, extended_timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            extended_timeout_secs,
            working_dir,
        }
    }

    fn timeout_for(&self, command: &str) -> u64 {
        let lower = command.to_lowercase();
        if SLOW_COMMAND_MARKERS.iter().any(|m| lower.contains(m)) {
            self.extended_timeout_secs
        } else {
            self.timeout_secs
        }
    }
}

#[derive(Deserialize)]
struct ExecArgs {
    command: String,
    working_dir: Option<String>,
}

#[async_trait]
impl ToolTrait for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }
    fn description(&self) -> &str {
        "Run a shell command in the task working directory."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run" },
                "working_dir": { "type": "string", "description": "Optional subdirectory to run in" }
            },
            "required": ["command"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Elevated
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: ExecArgs = serde_json::from_value(args)?;

        let working_dir = match args.working_dir {
            Some(dir) => confine_to_working_dir(&dir, &self.working_dir).await?,
            None => self.working_dir.clone(),
        };

        let timeout_secs = self.timeout_for(&args.command);
        debug!("exec ({}s budget): {}", timeout_secs, args.command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(working_dir);

        let output = match tokio::time::timeout(
            tokio::time::Duration::from_secs(timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to launch command: {}", e).into()),
            Err(_) => {
                return Err(format!("command timed out after {} seconds", timeout_secs).into())
            }
        };

        let mut parts = Vec::new();
        if !output.stdout.is_empty() {
            parts.push(String::from_utf8_lossy(&output.stdout).to_string());
        }
        if !output.stderr.is_empty() {
            parts.push(format!(
                "stderr:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        if output.status.code() != Some(0) {
            parts.push(format!("exit code: {}", output.status.code().unwrap_or(-1)));
        }

        if parts.is_empty() {
            Ok("(no output)".to_string())
        } else {
            Ok(parts.join("\n"))
        }
    }
}
