//! Clean command - remove downloaded workspaces

use anyhow::Result;
use console::style;
use std::time::Duration;

use crate::config::AppConfig;
use crate::repo::workspace;

pub fn run(config: &AppConfig, all: bool) -> Result<()> {
    let root = config.workdir();
    if !root.exists() {
        println!("No workspaces found at {}.", root.display());
        return Ok(());
    }

    let ttl = if all {
        Duration::ZERO
    } else {
        config.materializer.ttl()
    };
    let removed = workspace::cleanup_expired(&root, ttl)?;

    println!(
        "{} Removed {} workspace{} from {}",
        style("✓").green(),
        removed,
        if removed == 1 { "" } else { "s" },
        style(root.display()).cyan()
    );
    Ok(())
}
