//! Scheduled base reports
//!
//! Reads the latest exports, compares them with the previous run and posts
//! one Feishu card per report.
//!
//! Usage:
//!   cargo run -- --once                      # every report, one pass
//!   cargo run -- --once --report retidos     # single report
//!   cargo run -- --dry-run --interval-minutes 60

use anyhow::{bail, Context, Result};
use base_reports::config::Config;
use base_reports::pipeline::Pipeline;
use base_reports::reports::{self, ReportDefinition};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "base_reports")]
#[command(about = "Aggregate logistics exports per coordinator and post them to Feishu")]
struct Args {
    /// Run a single batch and exit
    #[arg(long)]
    once: bool,

    /// Report to run (retidos, sla, multas); repeatable, default all
    #[arg(long = "report")]
    reports: Vec<String>,

    /// Input file or directory, overriding REPORTS_INPUT_DIR
    #[arg(long)]
    input: Option<PathBuf>,

    /// Coordinator workbook, overriding REPORTS_REFERENCE_FILE
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Reference date for day counts (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Log the cards instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Also write the derived workbook to REPORTS_OUTPUT_DIR
    #[arg(long)]
    export: bool,

    /// Minutes between batches when not running once
    #[arg(long, env = "REPORTS_INTERVAL_MINUTES", default_value = "120")]
    interval_minutes: u64,
}

fn select_reports(names: &[String]) -> Result<Vec<ReportDefinition>> {
    if names.is_empty() {
        return Ok(reports::builtin());
    }
    names
        .iter()
        .map(|name| reports::find(name).with_context(|| format!("unknown report '{}'", name)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let defs = select_reports(&args.reports)?;
    if args.input.as_deref().is_some_and(|p| p.is_file()) && defs.len() > 1 {
        bail!("--input names a single file; pick one report with --report");
    }
    if args.interval_minutes == 0 {
        bail!("--interval-minutes must be at least 1");
    }

    let mut config = Config::from_env()?;
    if let Some(reference) = args.reference {
        config.reference_file = reference;
    }
    config.as_of = args.date;
    config.dry_run = args.dry_run;
    config.export = args.export;

    info!(
        "Reports: {}",
        defs.iter().map(|d| d.name).collect::<Vec<_>>().join(", ")
    );
    let pipeline = Pipeline::new(config)?;

    if args.once {
        let summary = pipeline.run_batch(&defs, args.input.as_deref()).await?;
        if !summary.is_clean() {
            bail!(
                "{} reports failed, {} had undelivered cards",
                summary.failed.len(),
                summary.undelivered.len()
            );
        }
        return Ok(());
    }

    pipeline
        .run_every(
            &defs,
            args.input.as_deref(),
            Duration::from_secs(args.interval_minutes * 60),
        )
        .await?;
    Ok(())
}
