//! Configuration module for bugsweep
//!
//! This module handles:
//! - Built-in pipeline defaults (thresholds, budgets, size caps)
//! - User-level config (~/.config/bugsweep/config.toml)
//! - Project-level config (./bugsweep.toml)
//! - Environment overrides (API keys, backend, workdir, bind address)

mod app_config;

pub use app_config::{
    AiSettings, AppConfig, BatchSettings, DispatchSettings, GithubSettings,
    MaterializerSettings, MicroBatchSettings, RecoverySettings, ServerSettings,
};
