//! Configuration management for relay
//!
//! Loads and saves engine tunables, oracle credentials, and store locations
//! from a JSON file under `~/.relay`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{checkpoints_dir, config_path, data_dir, workspace_path};

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Engine tunables controlling the execution loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDefaults {
    /// Hard cap on orchestrator iterations per task
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// Iteration budget for delegated sub-agents
    #[serde(default = "default_subagent_max_iterations")]
    pub subagent_max_iterations: u64,
    /// Compact after this many raw iterations since the last summary
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: u64,
    /// Trailing window of iterations that is never summarized
    #[serde(default = "default_keep_recent")]
    pub keep_recent: u64,
    /// Compact early when the active history estimate exceeds this many bytes
    #[serde(default = "default_max_active_bytes")]
    pub max_active_bytes: usize,
    /// Automatic retries for transient failures before escalating
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-call tool timeout in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Tool output beyond this many bytes is truncated with a marker
    #[serde(default = "default_max_tool_output_bytes")]
    pub max_tool_output_bytes: usize,
    /// Default permission tier for new tasks: "safe", "elevated" or "admin"
    #[serde(default = "default_permission_level")]
    pub permission_level: String,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            subagent_max_iterations: default_subagent_max_iterations(),
            compaction_threshold: default_compaction_threshold(),
            keep_recent: default_keep_recent(),
            max_active_bytes: default_max_active_bytes(),
            max_retries: default_max_retries(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_tool_output_bytes: default_max_tool_output_bytes(),
            permission_level: default_permission_level(),
        }
    }
}

fn default_max_iterations() -> u64 {
    30
}

fn default_subagent_max_iterations() -> u64 {
    10
}

fn default_compaction_threshold() -> u64 {
    12
}

fn default_keep_recent() -> u64 {
    4
}

fn default_max_active_bytes() -> usize {
    48_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_max_tool_output_bytes() -> usize {
    10_000
}

fn default_permission_level() -> String {
    "safe".to_string()
}

/// Oracle endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OracleConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

/// Checkpoint store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Override for the checkpoint directory; defaults to ~/.relay/checkpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineDefaults,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from a specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to a specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("saving config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Resolved checkpoint directory
    pub fn checkpoints_dir(&self) -> PathBuf {
        match &self.store.dir {
            Some(dir) => expand_home(dir),
            None => checkpoints_dir(),
        }
    }

    /// Oracle API key, if configured
    pub fn api_key(&self) -> Option<String> {
        if self.oracle.api_key.is_empty() {
            None
        } else {
            Some(self.oracle.api_key.clone())
        }
    }

    /// Verify oracle access is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    /// Default oracle model
    pub fn default_model(&self) -> String {
        self.oracle.model.clone()
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Initialize config file and workspace directories
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("config written to {:?}", config_path);
    }

    let workspace = workspace_path();
    tokio::fs::create_dir_all(&workspace).await?;
    tokio::fs::create_dir_all(checkpoints_dir()).await?;
    info!("workspace ready at {:?}", workspace);

    Config::load().await
}
