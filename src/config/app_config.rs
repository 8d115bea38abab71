//! Layered application configuration
//!
//! Supports loading config from (lowest to highest priority):
//! - Built-in defaults
//! - ~/.config/bugsweep/config.toml
//! - ./bugsweep.toml
//! - Environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::AcquisitionStrategy;

/// Project-level config file name, looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = "bugsweep.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub ai: AiSettings,
    pub github: GithubSettings,
    pub materializer: MaterializerSettings,
    pub batch: BatchSettings,
    pub micro_batch: MicroBatchSettings,
    pub dispatch: DispatchSettings,
    pub recovery: RecoverySettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// How often expired workspaces are swept (seconds)
    pub cleanup_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            cleanup_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AiSettings {
    /// "anthropic", "openai", "deepinfra", "openrouter", "ollama" or "local".
    /// Unset means: first backend with a key in the environment, else local.
    pub backend: Option<String>,
    /// Model override (default depends on backend)
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Base URL override, mostly for self-hosted OpenAI-compatible servers
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GithubSettings {
    pub api_url: String,
    pub archive_url: String,
    /// Base for `git clone` URLs when the clone strategy is used
    pub clone_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            archive_url: "https://codeload.github.com".to_string(),
            clone_url: "https://github.com".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaterializerSettings {
    pub strategy: AcquisitionStrategy,
    /// Repositories above this size are rejected before download
    pub max_repo_bytes: u64,
    /// A workspace younger than this is reused instead of re-fetched
    pub freshness_secs: u64,
    /// Workspaces older than this are deleted by the cleanup sweep
    pub ttl_secs: u64,
    /// Root directory for materialized repositories (default: user cache dir)
    pub workdir: Option<PathBuf>,
}

impl Default for MaterializerSettings {
    fn default() -> Self {
        Self {
            strategy: AcquisitionStrategy::Archive,
            max_repo_bytes: 10 * 1024 * 1024 * 1024,
            freshness_secs: 60 * 60,
            ttl_secs: 24 * 60 * 60,
            workdir: None,
        }
    }
}

impl MaterializerSettings {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSettings {
    pub default_batch_size: usize,
    /// Upper bound on what a client may request per page
    pub max_batch_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            default_batch_size: 4,
            max_batch_size: 50,
        }
    }
}

/// Thresholds for choosing the micro-batch width.
///
/// Empirical values; width 1 above the large thresholds, 2 above the
/// medium ones, 3 otherwise.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MicroBatchSettings {
    pub large_max_bytes: u64,
    pub large_avg_bytes: u64,
    pub medium_max_bytes: u64,
    pub medium_avg_bytes: u64,
}

impl Default for MicroBatchSettings {
    fn default() -> Self {
        Self {
            large_max_bytes: 50 * 1024,
            large_avg_bytes: 30 * 1024,
            medium_max_bytes: 20 * 1024,
            medium_avg_bytes: 15 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Files with at least this many lines are split into windows
    pub line_threshold: usize,
    pub window_lines: usize,
    /// Files are truncated (at a line boundary) beyond this many bytes
    pub max_file_bytes: usize,
    pub request_budget_ms: u64,
    pub micro_batch_budget_ms: u64,
    pub file_budget_ms: u64,
    pub max_concurrent_calls: usize,
    /// Pause before the second-chance sweep after an upstream rate limit
    pub rate_limit_backoff_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            line_threshold: 200,
            window_lines: 175,
            max_file_bytes: 200 * 1024,
            request_budget_ms: 25_000,
            micro_batch_budget_ms: 20_000,
            file_budget_ms: 8_000,
            max_concurrent_calls: 8,
            rate_limit_backoff_ms: 2_000,
        }
    }
}

impl DispatchSettings {
    pub fn request_budget(&self) -> Duration {
        Duration::from_millis(self.request_budget_ms)
    }

    pub fn micro_batch_budget(&self) -> Duration {
        Duration::from_millis(self.micro_batch_budget_ms)
    }

    pub fn file_budget(&self) -> Duration {
        Duration::from_millis(self.file_budget_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub max_depth: u32,
    /// Units at or below this many lines are not bisected further
    pub min_lines: u32,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_lines: 50,
        }
    }
}

impl AppConfig {
    /// Load config from all sources, with priority:
    /// 1. Environment variables (highest)
    /// 2. Project config (./bugsweep.toml)
    /// 3. User config (~/.config/bugsweep/config.toml)
    pub fn load() -> Result<Self> {
        let mut layers = Vec::new();
        if let Some(path) = Self::user_config_path() {
            layers.push(path);
        }
        layers.push(PathBuf::from(PROJECT_CONFIG_FILE));
        Self::load_from(&layers)
    }

    /// Load and merge the given files (later files win), then apply env overrides
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in paths.iter().filter(|p| p.exists()) {
            match read_toml(path) {
                Ok(value) => {
                    debug!("Loaded config layer from {}", path.display());
                    merge_values(&mut merged, value);
                }
                Err(e) => warn!("Ignoring config {}: {:#}", path.display(), e),
            }
        }

        let mut config: AppConfig = merged
            .try_into()
            .context("Configuration has invalid values")?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bugsweep").join("config.toml"))
    }

    /// Environment variables override everything
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.trim().is_empty() {
                self.github.token = Some(token);
            }
        }
        if let Ok(backend) = std::env::var("BUGSWEEP_BACKEND") {
            self.ai.backend = Some(backend);
        }
        if let Ok(workdir) = std::env::var("BUGSWEEP_WORKDIR") {
            self.materializer.workdir = Some(PathBuf::from(workdir));
        }
        if let Ok(bind) = std::env::var("BUGSWEEP_BIND") {
            self.server.bind = bind;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.dispatch.window_lines == 0 {
            anyhow::bail!("dispatch.window_lines must be at least 1");
        }
        if self.dispatch.line_threshold == 0 {
            anyhow::bail!("dispatch.line_threshold must be at least 1");
        }
        if self.batch.default_batch_size == 0 || self.batch.max_batch_size == 0 {
            anyhow::bail!("batch sizes must be at least 1");
        }
        if self.dispatch.max_concurrent_calls == 0 {
            anyhow::bail!("dispatch.max_concurrent_calls must be at least 1");
        }
        Ok(())
    }

    /// Root directory for materialized repositories
    pub fn workdir(&self) -> PathBuf {
        self.materializer
            .workdir
            .clone()
            .unwrap_or_else(crate::cache::default_workspace_root)
    }

    /// Write an example config to the user config path if none exists
    pub fn init_user_config() -> Result<PathBuf> {
        let config_path = Self::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !config_path.exists() {
            std::fs::write(&config_path, EXAMPLE_CONFIG)?;
        }

        Ok(config_path)
    }
}

const EXAMPLE_CONFIG: &str = r#"# bugsweep configuration

[server]
# bind = "127.0.0.1:3000"

[ai]
# Backend: "anthropic", "openai", "deepinfra", "openrouter", "ollama" or "local"
# (local = offline pattern rules, no key needed). Keys come from the environment:
# ANTHROPIC_API_KEY, OPENAI_API_KEY, DEEPINFRA_API_KEY, OPENROUTER_API_KEY.
# backend = "anthropic"
# model = "claude-sonnet-4-20250514"

[materializer]
# strategy = "archive"         # or "clone" (needs a git binary)
# max_repo_bytes = 10737418240
# freshness_secs = 3600

[batch]
# default_batch_size = 4

[micro_batch]
# large_max_bytes = 51200
# large_avg_bytes = 30720
# medium_max_bytes = 20480
# medium_avg_bytes = 15360

[dispatch]
# line_threshold = 200
# window_lines = 175
# request_budget_ms = 25000
# micro_batch_budget_ms = 20000
# file_budget_ms = 8000
# max_concurrent_calls = 8

[recovery]
# max_depth = 5
# min_lines = 50
"#;

fn read_toml(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Deep-merge `overlay` into `base`; tables merge key by key, everything else is replaced
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
