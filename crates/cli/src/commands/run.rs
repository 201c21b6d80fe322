//! Run Command

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use dialog_differ_common::{DiffOutcome, DifferConfig, SqliteStore, SuiteResult};
use dialog_differ_core::{
    PixelComparator, PlaywrightConfig, PlaywrightRenderer, SuiteController, SuiteEvent,
};

use super::{ResultDisplay, SuiteDisplay};
use crate::output::{print_error, print_item, print_list, print_structured, print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Suite document (JSON)
    pub suite: PathBuf,

    /// Exit with status 1 when any dialog is not identical
    #[arg(long)]
    pub fail_on_change: bool,
}

/// Number of captures and of compared pairs a suite document asks for
fn planned_work(doc: &Value) -> (u64, u64) {
    let dialogs = |side: &str| doc.get(side).and_then(Value::as_array).cloned().unwrap_or_default();
    let original = dialogs("original");
    let current = dialogs("current");

    let ids: BTreeSet<&str> = original
        .iter()
        .chain(current.iter())
        .filter_map(|d| d.get("id").and_then(Value::as_str))
        .collect();

    ((original.len() + current.len()) as u64, ids.len() as u64)
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{prefix:>8} [{bar:30}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Drive the progress bar from suite events until the run ends
async fn report_progress(mut rx: broadcast::Receiver<SuiteEvent>, bar: ProgressBar, pairs: u64) {
    loop {
        match rx.recv().await {
            Ok(SuiteEvent::SnapStart { .. }) => bar.set_prefix("snap"),
            Ok(SuiteEvent::Snap(progress)) => {
                let source = if progress.is_database { "stored" } else { "captured" };
                match &progress.error {
                    Some(e) => bar.println(format!("  {} {} {}", "✗".red(), progress.dialog.id, e.code)),
                    None => bar.set_message(format!("{} {}", source, progress.dialog.id)),
                }
                bar.inc(1);
            }
            Ok(SuiteEvent::DiffStart { .. }) => {
                bar.set_prefix("diff");
                bar.set_length(pairs);
                bar.set_position(0);
            }
            Ok(SuiteEvent::Diff(result)) => {
                bar.set_message(format!("{} {}", result.dialog_id, result.result));
                bar.inc(1);
            }
            Ok(SuiteEvent::End { .. }) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Progress display skipped {} event(s)", skipped);
            }
        }
    }
    bar.finish_and_clear();
}

fn colour_outcome(outcome: DiffOutcome, count: usize) -> String {
    let text = format!("{} {}", count, outcome);
    match outcome {
        DiffOutcome::Identical => text.dimmed().to_string(),
        DiffOutcome::Changed => text.yellow().to_string(),
        DiffOutcome::Added => text.green().to_string(),
        DiffOutcome::Deleted => text.red().to_string(),
        DiffOutcome::Error => text.red().bold().to_string(),
    }
}

fn print_summary(suite: &SuiteResult, format: OutputFormat) {
    if !format.is_human() {
        print_structured(suite, format);
        return;
    }

    let results: Vec<ResultDisplay> = suite.results.iter().map(ResultDisplay::from).collect();
    print_list(&results, format);
    print_item(&SuiteDisplay::from(suite), format);

    let stats = &suite.stats;
    let counts = [
        (DiffOutcome::Identical, stats.identical),
        (DiffOutcome::Changed, stats.changed),
        (DiffOutcome::Added, stats.added),
        (DiffOutcome::Deleted, stats.deleted),
        (DiffOutcome::Error, stats.error),
    ]
    .into_iter()
    .map(|(outcome, count)| colour_outcome(outcome, count))
    .collect::<Vec<_>>()
    .join(", ");
    print_success(&format!("Suite {} finished: {}", suite.id, counts));
}

pub async fn execute(args: RunArgs, config: &DifferConfig, format: OutputFormat) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(&args.suite)
        .await
        .with_context(|| format!("cannot read suite {}", args.suite.display()))?;
    let doc: Value = serde_json::from_str(&content)
        .with_context(|| format!("suite {} is not valid JSON", args.suite.display()))?;

    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("cannot open store {}", config.database_path.display()))?,
    );
    let renderer = Arc::new(PlaywrightRenderer::spawn(PlaywrightConfig::from_config(config)).await?);
    let controller = SuiteController::new(renderer.clone(), Arc::new(PixelComparator::new()), store, config)?;

    let (captures, pairs) = planned_work(&doc);
    let bar = progress_bar(captures, format.is_human());
    let progress = tokio::spawn(report_progress(controller.subscribe(), bar, pairs));

    let outcome = controller.run_document(&doc).await;
    drop(controller);
    renderer.shutdown().await;
    if let Err(e) = progress.await {
        tracing::debug!("Progress display stopped: {}", e);
    }

    let suite = match outcome {
        Ok(suite) => suite,
        Err(e) => {
            print_error(&format!("[{}] {}", e.code(), e));
            return Ok(ExitCode::FAILURE);
        }
    };

    print_summary(&suite, format);

    let stable = suite.results.iter().all(|r| r.result == DiffOutcome::Identical);
    if args.fail_on_change && !stable {
        if format.is_human() {
            print_warning("Differences found");
        }
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}
