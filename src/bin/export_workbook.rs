//! One-off export of a report's enriched rows and aggregate to Excel
//!
//! Runs the read/normalize/enrich/aggregate stages only: nothing is archived
//! or sent.

use anyhow::{Context, Result};
use base_reports::config::Config;
use base_reports::export;
use base_reports::pipeline::Pipeline;
use base_reports::reports;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "export_workbook")]
#[command(about = "Write Dados_Completos/ResumoNumerico sheets for one report")]
struct Args {
    /// Report name (retidos, sla, multas)
    #[arg(long)]
    report: String,

    /// Input file or directory, overriding REPORTS_INPUT_DIR
    #[arg(long)]
    input: Option<PathBuf>,

    /// Reference date for day counts (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Output workbook path
    #[arg(long)]
    output: PathBuf,

    /// Also write bases without a coordinator to this CSV
    #[arg(long)]
    unmatched: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let def = reports::find(&args.report)
        .with_context(|| format!("unknown report '{}'", args.report))?;

    let mut config = Config::from_env()?;
    config.as_of = args.date;
    let pipeline = Pipeline::new(config)?;
    let reference = pipeline.load_reference()?;
    let prepared = pipeline.prepare(&def, &reference, args.input.as_deref())?;

    export::write_workbook(
        &args.output,
        &prepared.shipments,
        &prepared.aggregate,
        def.detail_sheet,
        def.summary_sheet,
    )?;
    if let Some(path) = args.unmatched {
        export::write_unmatched_csv(&path, &prepared.enrich)?;
        info!(
            "{} bases without coordinator written to {:?}",
            prepared.enrich.unmatched_bases.len(),
            path
        );
    }

    info!(
        "Exported {} rows ({} groups) from {:?}",
        prepared.shipments.len(),
        prepared.aggregate.rows.len(),
        prepared.source
    );
    Ok(())
}
