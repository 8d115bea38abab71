//! Analyze command - drive every page of one repository from the terminal
//!
//! Behaves exactly like a polling client: one `run_batch` per page, carrying
//! the analysis ID forward until the pipeline reports no more batches.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::models::{AnalysisResult, IssueSummary, Severity};
use crate::pipeline::{AnalysisPipeline, BatchRequest};
use crate::repo::LocalLayout;

/// Create bar progress style
fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("valid template")
        .progress_chars("█▓▒░  ")
}

pub fn run(
    config: AppConfig,
    target: &str,
    batch_size: Option<usize>,
    local: Option<&Path>,
    format: &str,
) -> Result<()> {
    let (owner, repo) = super::parse_target(target)?;
    let pipeline = super::build_pipeline(config, local.map(|p| (p, LocalLayout::Single)))?;
    let json_output = format == "json";

    if !json_output {
        println!(
            "\n{} Sweeping {} with {}\n",
            style("🔎").bold(),
            style(format!("{owner}/{repo}")).cyan().bold(),
            style(pipeline.model_name()).dim()
        );
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let start = Instant::now();
    let sweep = rt.block_on(drive(&pipeline, owner, repo, batch_size, json_output))?;
    let elapsed = start.elapsed();

    if json_output {
        let summary = IssueSummary::from_results(&sweep.results);
        let output = json!({
            "analysisId": sweep.analysis_id,
            "repository": format!("{owner}/{repo}"),
            "totalFiles": sweep.total_files,
            "filesFailed": sweep.files_failed,
            "summary": summary,
            "results": sweep.results,
            "errors": sweep.errors,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text(&sweep, elapsed);
    }
    Ok(())
}

/// What a full sweep produced
struct Sweep {
    analysis_id: String,
    total_files: usize,
    files_failed: usize,
    results: Vec<AnalysisResult>,
    errors: Vec<String>,
}

async fn drive(
    pipeline: &AnalysisPipeline,
    owner: &str,
    repo: &str,
    batch_size: Option<usize>,
    quiet: bool,
) -> Result<Sweep> {
    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    let analysis_id = uuid::Uuid::new_v4().to_string();
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(create_bar_style());
        bar.set_message("preparing repository");
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        bar
    };

    let mut sweep = Sweep {
        analysis_id: analysis_id.clone(),
        total_files: 0,
        files_failed: 0,
        results: Vec::new(),
        errors: Vec::new(),
    };
    let mut batch_index = 0;

    loop {
        let mut request = BatchRequest::new(owner, repo, batch_index).with_analysis_id(&analysis_id);
        request.batch_size = batch_size;

        let response = pipeline.run_batch(request, &token).await?;
        sweep.total_files = response.total_files_in_repo;
        sweep.files_failed += response.files_failed.unwrap_or(0);
        sweep.results.extend(response.results);

        bar.set_length(response.total_files_in_repo as u64);
        bar.set_position(response.batch_end_index as u64);
        bar.set_message(format!("{:.0}%", response.progress.percentage));
        if let Some(error) = &response.error {
            bar.println(format!("{} {}", style("⚠").yellow(), error));
        }

        match response.next_batch_index {
            Some(next) if response.has_more_batches && !token.is_cancelled() => batch_index = next,
            _ => break,
        }
    }
    bar.finish_and_clear();

    if token.is_cancelled() {
        sweep.errors.push("Interrupted before the last page".to_string());
    }
    if let Some(session) = pipeline.session(&analysis_id) {
        sweep.errors.extend(session.errors);
    }
    Ok(sweep)
}

fn severity_label(severity: Severity) -> console::StyledObject<&'static str> {
    match severity {
        Severity::Critical => style("CRITICAL").red().bold(),
        Severity::High => style("HIGH").red(),
        Severity::Medium => style("MEDIUM").yellow(),
        Severity::Low => style("LOW").dim(),
    }
}

fn print_text(sweep: &Sweep, elapsed: std::time::Duration) {
    let mut results: Vec<&AnalysisResult> =
        sweep.results.iter().filter(|r| !r.issues.is_empty()).collect();
    results.sort_by(|a, b| a.file.cmp(&b.file));

    for result in &results {
        println!("{}", style(&result.file).bold());
        let mut issues: Vec<_> = result.issues.iter().collect();
        issues.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.start_line.cmp(&b.start_line)));
        for issue in issues {
            println!(
                "  {:<8} L{}-{} [{}] {}",
                severity_label(issue.severity),
                issue.start_line,
                issue.end_line,
                issue.error_type,
                issue.issue
            );
            if !issue.suggested_fix.is_empty() {
                println!("           {} {}", style("fix:").dim(), issue.suggested_fix);
            }
        }
        println!();
    }

    let summary = IssueSummary::from_results(&sweep.results);
    println!(
        "{} {} issues in {} files ({} critical, {} high, {} medium, {} low)",
        style("Summary:").bold(),
        summary.total,
        results.len(),
        summary.critical,
        summary.high,
        summary.medium,
        summary.low
    );
    println!(
        "  {} files scanned in {:.1}s",
        sweep.total_files,
        elapsed.as_secs_f64()
    );
    if sweep.files_failed > 0 {
        println!(
            "  {} {} files could not be analyzed",
            style("⚠").yellow(),
            sweep.files_failed
        );
    }
    for error in sweep.errors.iter().take(10) {
        println!("  {} {}", style("•").dim(), error);
    }
}
