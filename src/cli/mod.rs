//! CLI command definitions and handlers

mod analyze;
mod clean;
mod init;
mod serve;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ai::build_model_client;
use crate::cache::ensure_workspace_root;
use crate::config::AppConfig;
use crate::pipeline::AnalysisPipeline;
use crate::repo::{GithubMaterializer, LocalDirectory, LocalLayout, RepositorySource};
use crate::status::InMemorySessionStore;

/// Parse and validate a batch size (1-256)
fn parse_batch_size(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("batch size must be at least 1".to_string())
    } else if n > 256 {
        Err("batch size cannot exceed 256".to_string())
    } else {
        Ok(n)
    }
}

/// bugsweep - LLM-powered repository bug sweep
#[derive(Parser, Debug)]
#[command(name = "bugsweep")]
#[command(
    version,
    about = "Page a repository through an LLM bug, security and code-smell sweep",
    long_about = "bugsweep downloads a GitHub repository, orders its source files, and \
analyzes them page by page with a language model. Large files are split into line \
windows; failed calls are bisected and retried so one bad chunk never sinks a file.\n\n\
Without an API key the offline pattern analyzer is used.",
    after_help = "\
Examples:
  bugsweep serve                           Start the HTTP API on the configured address
  bugsweep analyze octocat/hello-world     Sweep a GitHub repository
  bugsweep analyze me/app --local .        Sweep the current directory
  bugsweep analyze me/app --format json    JSON output for scripting
  bugsweep clean --all                     Remove every downloaded workspace"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind (default from config, then 127.0.0.1:8080)
        #[arg(long)]
        bind: Option<String>,

        /// Serve repositories from {DIR}/{owner}/{repo} instead of GitHub
        #[arg(long, value_name = "DIR")]
        local: Option<PathBuf>,
    },

    /// Analyze a repository page by page and print the issues found
    #[command(after_help = "\
Examples:
  bugsweep analyze octocat/hello-world
  bugsweep analyze octocat/hello-world --batch-size 8
  bugsweep analyze me/app --local ./app --backend local")]
    Analyze {
        /// Repository as OWNER/REPO
        target: String,

        /// Files per page
        #[arg(long, value_parser = parse_batch_size)]
        batch_size: Option<usize>,

        /// Analyze an existing checkout instead of downloading
        #[arg(long, value_name = "PATH")]
        local: Option<PathBuf>,

        /// Model backend: anthropic, openai, deepinfra, openrouter, ollama, local
        #[arg(long)]
        backend: Option<String>,

        /// Output format
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Remove expired (or all) downloaded workspaces
    Clean {
        /// Remove every workspace, not just expired ones
        #[arg(long)]
        all: bool,
    },

    /// Write an example config to the user config directory
    Init,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init => init::run(),
        Commands::Serve { bind, local } => {
            let config = AppConfig::load()?;
            serve::run(config, bind, local.as_deref())
        }
        Commands::Analyze {
            target,
            batch_size,
            local,
            backend,
            format,
        } => {
            let mut config = AppConfig::load()?;
            if backend.is_some() {
                config.ai.backend = backend;
            }
            analyze::run(config, &target, batch_size, local.as_deref(), &format)
        }
        Commands::Clean { all } => {
            let config = AppConfig::load()?;
            clean::run(&config, all)
        }
    }
}

/// Split `OWNER/REPO`
fn parse_target(target: &str) -> Result<(&str, &str)> {
    let (owner, repo) = target
        .trim_end_matches('/')
        .split_once('/')
        .with_context(|| format!("Expected OWNER/REPO, got '{}'", target))?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        anyhow::bail!("Expected OWNER/REPO, got '{}'", target);
    }
    Ok((owner, repo))
}

/// Wire up a pipeline from config
fn build_pipeline(
    config: AppConfig,
    local: Option<(&Path, LocalLayout)>,
) -> Result<Arc<AnalysisPipeline>> {
    let model = build_model_client(&config.ai).context("Failed to configure model backend")?;
    let source: Arc<dyn RepositorySource> = match local {
        Some((path, layout)) => {
            let path = path
                .canonicalize()
                .with_context(|| format!("Path does not exist: {}", path.display()))?;
            Arc::new(LocalDirectory::new(path, layout))
        }
        None => {
            let root = ensure_workspace_root(&config.workdir())
                .context("Failed to create workspace directory")?;
            Arc::new(GithubMaterializer::new(
                config.materializer.clone(),
                &config.github,
                root,
            )?)
        }
    };
    Ok(Arc::new(AnalysisPipeline::new(
        config,
        source,
        model,
        Arc::new(InMemorySessionStore::new()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("octo/hello").unwrap(), ("octo", "hello"));
        assert_eq!(parse_target("octo/hello/").unwrap(), ("octo", "hello"));
        assert!(parse_target("octo").is_err());
        assert!(parse_target("/hello").is_err());
        assert!(parse_target("a/b/c").is_err());
    }

    #[test]
    fn test_parse_batch_size() {
        assert_eq!(parse_batch_size("4"), Ok(4));
        assert!(parse_batch_size("0").is_err());
        assert!(parse_batch_size("1000").is_err());
        assert!(parse_batch_size("four").is_err());
    }

    #[test]
    fn test_cli_parses_analyze() {
        let cli = Cli::try_parse_from([
            "bugsweep",
            "analyze",
            "octo/hello",
            "--batch-size",
            "8",
            "--backend",
            "local",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze {
                target,
                batch_size,
                backend,
                format,
                ..
            } => {
                assert_eq!(target, "octo/hello");
                assert_eq!(batch_size, Some(8));
                assert_eq!(backend.as_deref(), Some("local"));
                assert_eq!(format, "json");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_log_level_is_global() {
        let cli = Cli::try_parse_from(["bugsweep", "clean", "--all", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Clean { all: true }));
    }
}
