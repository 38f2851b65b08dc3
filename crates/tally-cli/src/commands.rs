use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use tally_reconcile::{
    CorrectionKind, CorrectionOrchestrator, CorrectionOutcome, CorrectionRun, Drift, DriftReport,
    ReconcileConfig, ReplayEngine, ReplaySummary, RunMode,
};
use tally_store::{InMemoryRecordStore, StoreSnapshot, Stored};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(dispatch(&cli))
}

pub(crate) async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Catalog(_) => cmd_catalog(&cli.format),
        Command::Run(args) => cmd_run(cli, args).await,
        Command::Audit(args) => cmd_audit(cli, args).await,
        Command::History(args) => cmd_history(cli, args).await,
    }
}

pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<ReconcileConfig> {
    let Some(path) = path else {
        return Ok(ReconcileConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

pub(crate) fn open_store(path: &Path) -> anyhow::Result<InMemoryRecordStore> {
    let bytes = fs::read(path).with_context(|| format!("reading store {}", path.display()))?;
    let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing store {}", path.display()))?;
    let store = InMemoryRecordStore::from_snapshot(snapshot);
    debug!(path = %path.display(), "store snapshot loaded");
    Ok(store)
}

pub(crate) fn save_store(store: &InMemoryRecordStore, path: &Path) -> anyhow::Result<()> {
    let snapshot = store.snapshot()?;
    let bytes = serde_json::to_vec_pretty(&snapshot)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, bytes).with_context(|| format!("writing {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| format!("replacing {}", path.display()))?;
    debug!(path = %path.display(), "store snapshot saved");
    Ok(())
}

fn cmd_catalog(format: &OutputFormat) -> anyhow::Result<()> {
    let catalog = CorrectionKind::catalog();
    match format {
        OutputFormat::Json => {
            let items: Vec<_> = catalog
                .iter()
                .map(|kind| json!({ "operation": kind.to_string(), "description": kind.description() }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            for kind in &catalog {
                println!("  {:<36} {}", kind.to_string().bold(), kind.description().dimmed());
            }
        }
    }
    Ok(())
}

async fn cmd_run(cli: &Cli, args: &RunArgs) -> anyhow::Result<()> {
    let kind: CorrectionKind = args.operation.parse()?;
    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&cli.store)?;
    let mode = if args.force { RunMode::Force } else { RunMode::IfChanged };

    // Partial progress is persisted even when the run fails part way.
    let result = CorrectionOrchestrator::new(&store, config).run(&kind, mode).await;
    save_store(&store, &cli.store)?;
    let outcome = result.with_context(|| format!("{kind} failed; rerun to resume"))?;

    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "skipped": outcome.is_skipped(),
                "run_record": outcome.run().id,
                "run": outcome.run().record,
            }))?
        ),
        OutputFormat::Text => print_outcome(&kind, &outcome),
    }
    Ok(())
}

fn print_outcome(kind: &CorrectionKind, outcome: &CorrectionOutcome) {
    let run = &outcome.run().record;
    match outcome {
        CorrectionOutcome::Skipped { .. } => {
            println!(
                "{} {} unchanged since run {} at {}",
                "•".blue(),
                kind.to_string().bold(),
                run.run_id.to_string().yellow(),
                run.completed_at.format("%Y-%m-%d %H:%M:%S"),
            );
            println!("  Nothing to do. Use {} to run anyway.", "--force".bold());
        }
        CorrectionOutcome::Applied(_) => {
            println!("{} {} complete", "✓".green().bold(), kind.to_string().bold());
            println!("  Run: {}", run.run_id.to_string().yellow());
            print_summary(&run.summary);
        }
    }
}

fn print_summary(summary: &ReplaySummary) {
    println!(
        "  Scanned: {} records, {} events",
        summary.records_scanned, summary.events_processed
    );
    println!(
        "  Counterparties: {} updated, {} unchanged",
        summary.counterparties_updated.to_string().green(),
        summary.counterparties_unchanged
    );
    if summary.entries_rethreaded + summary.entries_unchanged > 0 {
        println!(
            "  Running balances: {} rethreaded, {} unchanged",
            summary.entries_rethreaded.to_string().green(),
            summary.entries_unchanged
        );
    }
    if summary.entries_removed > 0 {
        println!("  Duplicates removed: {}", summary.entries_removed.to_string().red());
    }
    if summary.resumed_from > 0 {
        println!("  Resumed after {} staged writes", summary.resumed_from);
    }
}

async fn cmd_audit(cli: &Cli, args: &AuditArgs) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&cli.store)?;
    let report = ReplayEngine::new(&store, config).audit().await?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    if args.strict && !report.is_clean() {
        bail!(
            "drift found: {} money, {} container, {} running balances",
            report.money.len(),
            report.containers.len(),
            report.stale_running_balances
        );
    }
    Ok(())
}

fn print_report(report: &DriftReport) {
    if report.is_clean() {
        println!(
            "{} {} counterparties match a full replay",
            "✓".green().bold(),
            report.counterparties_checked
        );
        return;
    }
    println!(
        "{} {} money and {} container drifts across {} counterparties",
        "!".yellow().bold(),
        report.money.len(),
        report.containers.len(),
        report.counterparties_checked
    );
    for drift in &report.money {
        print_drift("money", drift);
    }
    for drift in &report.containers {
        print_drift("containers", drift);
    }
    if report.stale_running_balances > 0 {
        println!(
            "  {} entries with stale running balances",
            report.stale_running_balances.to_string().yellow()
        );
    }
}

fn print_drift(label: &str, drift: &Drift) {
    println!(
        "  {:<24} {:<10} stored {} → derived {}",
        drift.counterparty.to_string().bold(),
        label,
        drift.stored.to_string().red(),
        drift.derived.to_string().green()
    );
}

async fn cmd_history(cli: &Cli, args: &HistoryArgs) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&cli.store)?;
    let mut runs = CorrectionOrchestrator::new(&store, config).history().await?;
    if let Some(operation) = &args.operation {
        let kind: CorrectionKind = operation.parse()?;
        runs.retain(|run| run.record.operation == kind.to_string());
    }
    let skip = runs.len().saturating_sub(args.limit);
    let runs: Vec<Stored<CorrectionRun>> = runs.into_iter().skip(skip).collect();

    match cli.format {
        OutputFormat::Json => {
            let records: Vec<&CorrectionRun> = runs.iter().map(|run| &run.record).collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No correction runs recorded.");
            }
            for run in &runs {
                let record = &run.record;
                let forced = if record.forced { " (forced)" } else { "" };
                println!(
                    "{}  {}{}  state {}",
                    record.completed_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    record.operation.bold(),
                    forced.yellow(),
                    record.state_digest.short().cyan()
                );
                println!(
                    "  {} updated, {} rethreaded, {} removed",
                    record.summary.counterparties_updated,
                    record.summary.entries_rethreaded,
                    record.summary.entries_removed
                );
            }
        }
    }
    Ok(())
}
