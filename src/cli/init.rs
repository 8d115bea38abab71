//! Init command - write an example config

use anyhow::Result;
use console::style;

use crate::config::AppConfig;

pub fn run() -> Result<()> {
    let existed = AppConfig::user_config_path().is_some_and(|p| p.exists());
    let path = AppConfig::init_user_config()?;

    if existed {
        println!(
            "{} Config already exists at {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
    } else {
        println!(
            "{} Created {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
    }
    println!(
        "\n  Set an API key ({}, {}, ...) or keep the offline {} backend.",
        style("ANTHROPIC_API_KEY").bold(),
        style("OPENAI_API_KEY").bold(),
        style("local").bold()
    );
    Ok(())
}
