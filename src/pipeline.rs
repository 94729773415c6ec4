//! Report cycle orchestration
//!
//! One cycle per report: locate → read → normalize → enrich → aggregate →
//! compare → format → notify → archive. Nothing is archived until every
//! earlier step succeeded. A batch runs every selected report in turn; one
//! report failing never stops the others.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

use crate::aggregate::{aggregate, AggregateResult};
use crate::archive::Archive;
use crate::compare::{compare, ComparisonResult};
use crate::config::Config;
use crate::coordinators::{enrich, EnrichOutcome, ReferenceTable};
use crate::error::{ReportError, Result};
use crate::export;
use crate::format::{build_payload, NotificationPayload};
use crate::loader;
use crate::models::Shipment;
use crate::normalize::normalize;
use crate::notify::{Notifier, SendOutcome};
use crate::reports::ReportDefinition;

/// Everything computed from the input before any side effect
#[derive(Debug)]
pub struct Prepared {
    pub source: PathBuf,
    pub shipments: Vec<Shipment>,
    pub enrich: EnrichOutcome,
    pub aggregate: AggregateResult,
}

#[derive(Debug)]
pub struct CycleOutcome {
    pub report: String,
    pub source: PathBuf,
    pub rows: usize,
    /// `None` on dry runs and when a delivery failed
    pub archived: Option<PathBuf>,
    pub comparison: ComparisonResult,
    pub payload: NotificationPayload,
    /// Empty on dry runs or when no webhook is configured
    pub deliveries: Vec<SendOutcome>,
}

impl CycleOutcome {
    pub fn delivered(&self) -> bool {
        self.deliveries.iter().all(SendOutcome::is_ok)
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<String>,
    /// Reports whose input was absent or lacked a required column
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    /// Reports that ran but had at least one webhook delivery fail
    pub undelivered: Vec<String>,
}

impl BatchSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.undelivered.is_empty()
    }
}

pub struct Pipeline {
    config: Config,
    archive: Archive,
    notifier: Notifier,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let archive = Archive::new(&config.archive_dir, config.retention);
        let notifier = Notifier::new(config.webhook_timeout, config.send_delay)?;
        Ok(Self {
            config,
            archive,
            notifier,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn load_reference(&self) -> Result<ReferenceTable> {
        ReferenceTable::load(
            &self.config.reference_file,
            self.config.reference_sheet.as_deref(),
        )
    }

    /// `input` may name the file to read or a directory to search; without
    /// it the configured input directory is searched. An explicit path that
    /// does not exist is a configuration error, not a missing input.
    pub fn locate(&self, def: &ReportDefinition, input: Option<&Path>) -> Result<PathBuf> {
        match input {
            Some(path) if path.is_file() => Ok(path.to_path_buf()),
            Some(dir) if dir.is_dir() => loader::find_latest(dir, def.file_pattern),
            Some(path) => Err(ReportError::Config(format!(
                "input path {} does not exist",
                path.display()
            ))),
            None => loader::find_latest(&self.config.input_dir, def.file_pattern),
        }
    }

    /// Load, normalize, enrich and aggregate one report's input
    pub fn prepare(
        &self,
        def: &ReportDefinition,
        reference: &ReferenceTable,
        input: Option<&Path>,
    ) -> Result<Prepared> {
        let source = self.locate(def, input)?;
        info!("[{}] Reading {:?}", def.name, source);

        let mut snapshot = loader::read_snapshot(&source, def.sheet)?;
        let as_of = self.config.as_of.unwrap_or_else(|| Local::now().date_naive());
        let mut shipments = normalize(&mut snapshot, &def.schema, as_of)?;
        if shipments.is_empty() {
            warn!("[{}] {} has no data rows", def.name, snapshot.file_name());
        }

        let enrich = enrich(&mut shipments, reference);
        let aggregate = aggregate(
            def.name,
            &shipments,
            &def.group_by,
            &def.matcher,
            def.headline,
        );

        Ok(Prepared {
            source,
            shipments,
            enrich,
            aggregate,
        })
    }

    pub async fn run_cycle(
        &self,
        def: &ReportDefinition,
        reference: &ReferenceTable,
        input: Option<&Path>,
    ) -> Result<CycleOutcome> {
        let prepared = self.prepare(def, reference, input)?;

        let previous = self.archive.latest(def.name)?;
        if previous.is_none() {
            info!("[{}] No previous run to compare against", def.name);
        }

        if self.config.export {
            self.export(def, &prepared)?;
        }

        let comparison = compare(prepared.aggregate, previous.as_ref(), def.polarity);
        let payload = build_payload(
            def,
            &comparison,
            &prepared.shipments,
            self.config.link_url.as_deref(),
        );

        let deliveries = if self.config.dry_run {
            info!("[{}] Dry run, card not sent:\n{}", def.name, payload.to_text());
            Vec::new()
        } else {
            let targets = self.config.targets_for(&def.webhooks);
            if targets.is_empty() {
                warn!("[{}] No webhook configured, card not sent", def.name);
            }
            self.notifier.send_all(&targets, &payload).await
        };

        // the baseline only moves when recipients saw this card
        let archived = if self.config.dry_run {
            None
        } else if deliveries.iter().any(|d| !d.is_ok()) {
            warn!("[{}] Delivery failed, archive left unchanged", def.name);
            None
        } else {
            if let Err(e) = self.archive.archive_source(def.name, &prepared.source) {
                warn!("[{}] Source file not archived: {}", def.name, e);
            }
            Some(self.archive.store(&comparison.current)?)
        };

        Ok(CycleOutcome {
            report: def.name.to_string(),
            source: prepared.source,
            rows: prepared.shipments.len(),
            archived,
            comparison,
            payload,
            deliveries,
        })
    }

    fn export(&self, def: &ReportDefinition, prepared: &Prepared) -> Result<()> {
        let stamp = prepared.aggregate.generated_at.format("%Y%m%d_%H%M%S");
        let workbook = self
            .config
            .output_dir
            .join(format!("{}_{}.xlsx", def.name, stamp));
        export::write_workbook(
            &workbook,
            &prepared.shipments,
            &prepared.aggregate,
            def.detail_sheet,
            def.summary_sheet,
        )?;
        if !prepared.enrich.unmatched_bases.is_empty() {
            let csv = self
                .config
                .output_dir
                .join(format!("{}_sem_coordenador_{}.csv", def.name, stamp));
            export::write_unmatched_csv(&csv, &prepared.enrich)?;
        }
        Ok(())
    }

    /// Run every report once. Only a reference table that cannot be loaded
    /// aborts the batch.
    pub async fn run_batch(
        &self,
        defs: &[ReportDefinition],
        input: Option<&Path>,
    ) -> Result<BatchSummary> {
        let reference = self.load_reference()?;
        let mut summary = BatchSummary::default();

        for def in defs {
            match self.run_cycle(def, &reference, input).await {
                Ok(outcome) => {
                    info!(
                        "[{}] {} rows from {:?}, archived to {:?}",
                        outcome.report, outcome.rows, outcome.source, outcome.archived
                    );
                    if !outcome.delivered() {
                        summary.undelivered.push(outcome.report.clone());
                    }
                    summary.succeeded.push(outcome.report);
                }
                Err(e) if e.is_input_missing() => {
                    warn!("[{}] Skipped: {}", def.name, e);
                    summary.skipped.push((def.name.to_string(), e.to_string()));
                }
                Err(e) => {
                    error!("[{}] Failed: {}", def.name, e);
                    summary.failed.push((def.name.to_string(), e.to_string()));
                }
            }
        }

        if let Err(e) = self.archive.cleanup(SystemTime::now()) {
            warn!("Archive cleanup failed: {}", e);
        }

        info!(
            "Batch finished: {} ok, {} skipped, {} failed",
            summary.succeeded.len(),
            summary.skipped.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Run a batch now and then every `interval` until Ctrl-C
    pub async fn run_every(
        &self,
        defs: &[ReportDefinition],
        input: Option<&Path>,
        interval: Duration,
    ) -> Result<()> {
        info!("Scheduling {} reports every {} minutes", defs.len(), interval.as_secs() / 60);
        loop {
            if let Err(e) = self.run_batch(defs, input).await {
                error!("Batch aborted: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping scheduler");
                    return Ok(());
                }
            }
        }
    }
}
