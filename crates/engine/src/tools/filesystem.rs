//! Working-directory file tools

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use tracing::debug;

use relay_store::PermissionTier;

use super::path_utils::confine_to_working_dir;
use super::ToolTrait;

/// Read a file inside the working directory
pub struct ReadFileTool {
    working_dir: PathBuf,
}

impl ReadFileTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "File path to read" } },
            "required": ["path"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Safe
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: ReadFileArgs = serde_json::from_value(args)?;
        let path = confine_to_working_dir(&args.path, &self.working_dir).await?;

        debug!("reading {:?}", path);
        if !path.exists() {
            return Err(format!("no such file: {}", args.path).into());
        }
        if !path.is_file() {
            return Err(format!("not a regular file: {}", args.path).into());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(content)
    }
}

/// Write a file inside the working directory, creating parent directories
pub struct WriteFileTool {
    working_dir: PathBuf,
}

impl WriteFileTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolTrait for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Destination file path" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Elevated
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: WriteFileArgs = serde_json::from_value(args)?;
        let path = confine_to_working_dir(&args.path, &self.working_dir).await?;

        debug!("writing {:?}", path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &args.content).await?;
        Ok(format!(
            "wrote {} bytes to {}",
            args.content.len(),
            args.path
        ))
    }
}

/// Replace an exact text segment inside a file
pub struct EditFileTool {
    working_dir: PathBuf,
}

impl EditFileTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Deserialize)]
struct EditFileArgs {
    path: String,
    old_text: String,
    new_text: String,
}

#[async_trait]
impl ToolTrait for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn description(&self) -> &str {
        "Replace old_text with new_text in a file. old_text must match exactly once."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to edit" },
                "old_text": { "type": "string", "description": "Text segment to replace" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Elevated
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: EditFileArgs = serde_json::from_value(args)?;
        let path = confine_to_working_dir(&args.path, &self.working_dir).await?;

        debug!("editing {:?}", path);
        if !path.exists() {
            return Err(format!("no such file: {}", args.path).into());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let count = content.matches(&args.old_text).count();
        if count == 0 {
            return Err("old_text not found in file".into());
        }
        if count > 1 {
            return Err(format!("old_text is ambiguous: {} matches", count).into());
        }
        let new_content = content.replacen(&args.old_text, &args.new_text, 1);
        tokio::fs::write(&path, new_content).await?;
        Ok(format!("edited {}", args.path))
    }
}

/// List a directory inside the working directory
pub struct ListDirTool {
    working_dir: PathBuf,
}

impl ListDirTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Deserialize)]
struct ListDirArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List the contents of a directory."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "Directory to list" } },
            "required": ["path"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Safe
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: ListDirArgs = serde_json::from_value(args)?;
        let path = confine_to_working_dir(&args.path, &self.working_dir).await?;

        debug!("listing {:?}", path);
        if !path.exists() {
            return Err(format!("no such directory: {}", args.path).into());
        }
        if !path.is_dir() {
            return Err(format!("not a directory: {}", args.path).into());
        }
        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let prefix = if entry.file_type().await?.is_dir() {
                "[dir] "
            } else {
                "[file] "
            };
            items.push(format!("{}{}", prefix, name));
        }
        items.sort();
        if items.is_empty() {
            Ok(format!("(empty) {}", args.path))
        } else {
            Ok(items.join("\n"))
        }
    }
}

/// Delete a file inside the working directory
pub struct RemoveFileTool {
    working_dir: PathBuf,
}

impl RemoveFileTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Deserialize)]
struct RemoveFileArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for RemoveFileTool {
    fn name(&self) -> &str {
        "remove_file"
    }
    fn description(&self) -> &str {
        "Delete a file. Irreversible."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "File path to delete" } },
            "required": ["path"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Admin
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: RemoveFileArgs = serde_json::from_value(args)?;
        let path = confine_to_working_dir(&args.path, &self.working_dir).await?;

        debug!("removing {:?}", path);
        if !path.exists() {
            return Err(format!("no such file: {}", args.path).into());
        }
        if !path.is_file() {
            return Err(format!("not a regular file: {}", args.path).into());
        }
        tokio::fs::remove_file(&path).await?;
        Ok(format!("removed {}", args.path))
    }
}
