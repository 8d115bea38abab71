//! Serve command - run the HTTP API

use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::repo::LocalLayout;

pub fn run(mut config: AppConfig, bind: Option<String>, local: Option<&Path>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let bind = config.server.bind.clone();

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(async move {
        let pipeline = super::build_pipeline(config, local.map(|p| (p, LocalLayout::PerRepo)))?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n   Shutting down...");
            }
            signal.cancel();
        });

        crate::server::serve(pipeline, &bind, shutdown).await
    })
}
