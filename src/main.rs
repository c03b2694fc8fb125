use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use repodex_core::bootstrap::{build_indexer, create_provider, resolve_config_path};
use repodex_core::config::Config;
use repodex_index::indexer::IndexReport;
use repodex_index::watcher::IndexWatcher;
use tokio_util::sync::CancellationToken;

/// Keep a structural, embedded snapshot of a source tree up to date.
#[derive(Debug, Parser)]
#[command(name = "repodex", version, about)]
struct Cli {
    /// Repository root to index.
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to `REPODEX_CONFIG` or `repodex.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep running and re-index when files change.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    config.validate()?;

    let root = std::fs::canonicalize(&cli.root)
        .with_context(|| format!("repository root {} not found", cli.root.display()))?;

    let provider = Arc::new(create_provider(&config)?);
    let indexer = Arc::new(build_indexer(&config, &root, provider).await?);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        signal_cancel.cancel();
    });

    let report = indexer.index_project(&root, &cancel).await?;
    print_report(&report);

    if cli.watch || config.index.watch {
        let watcher = IndexWatcher::start(&root, Arc::clone(&indexer))?;
        tracing::info!(root = %root.display(), "watching for changes");
        cancel.cancelled().await;
        watcher.stop().await;
    }

    Ok(())
}

fn print_report(report: &IndexReport) {
    println!(
        "scanned {} files: {} unchanged, {} processed, {} relocated, {} empty",
        report.files_scanned,
        report.files_unchanged,
        report.files_processed,
        report.files_relocated,
        report.files_skipped_empty,
    );
    println!(
        "units: {} created, {} carried forward, {} rows removed ({} ms)",
        report.units_created, report.units_carried, report.rows_removed, report.duration_ms,
    );
    for failure in &report.parse_failures {
        println!("parse failure: {failure}");
    }
    for failure in &report.embedding_failures {
        println!("embedding failure: {failure}");
    }
}
