//! The drafting run — `quill run`.

use crate::Cli;
use anyhow::{Context, Result};
use console::style;
use quill::audit::RunLog;
use quill::client::{GateConfig, HttpGenerationClient, RequestGate};
use quill::config::{QuillToml, TargetDepth};
use quill::orchestrator::{Orchestrator, RunStatus};
use quill::store::FileStore;
use quill::ui::RunReporter;
use std::path::Path;
use std::sync::Arc;

pub async fn cmd_run(cli: &Cli, depth: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    let mut config = QuillToml::load_or_default(&cli.config)?;
    if let Some(depth) = depth {
        config.run.target_depth = parse_depth(depth)?;
    }

    let store = Arc::new(
        FileStore::open(&cli.tree)
            .with_context(|| format!("no tree at {} (run `quill init` first)", cli.tree.display()))?,
    );
    let log = match log_file {
        Some(path) => Arc::new(RunLog::with_file(path)?),
        None => Arc::new(RunLog::in_memory()),
    };
    let client = Arc::new(HttpGenerationClient::new(&config.backend)?);
    let gate = RequestGate::start(client, GateConfig::from_settings(&config.gate), log.clone());
    let reporter = Arc::new(RunReporter::new());

    let orchestrator = Orchestrator::new(store, gate, log, config.run.clone())
        .with_reporter(reporter.clone());

    // Ctrl-C requests a cooperative stop; the in-flight call completes and
    // the run reports `stopped` with resumable state.
    let stop = orchestrator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let report = orchestrator.run().await;

    reporter.println(&format!(
        "\n{} in {}s — {} backend call(s), {} node(s) ({} new)",
        style(report.status.to_string()).bold(),
        (report.finished_at - report.started_at).num_seconds(),
        report.requests,
        report.nodes_after,
        report.nodes_after.saturating_sub(report.nodes_before),
    ));

    match report.status {
        RunStatus::Error => anyhow::bail!(
            "run aborted: {}",
            report.message.unwrap_or_else(|| "unknown error".into())
        ),
        RunStatus::Stopped => {
            println!("Stopped early; re-run `quill run` to resume.");
            Ok(())
        }
        RunStatus::Completed => Ok(()),
    }
}

fn parse_depth(s: &str) -> Result<TargetDepth> {
    match s.to_ascii_lowercase().as_str() {
        "outline" => Ok(TargetDepth::Outline),
        "plot" => Ok(TargetDepth::Plot),
        "chapter" => Ok(TargetDepth::Chapter),
        "prose" => Ok(TargetDepth::Prose),
        other => anyhow::bail!("unknown depth '{}', expected outline|plot|chapter|prose", other),
    }
}
