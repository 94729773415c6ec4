//! Timestamped archive of previous runs
//!
//! Layout: `{dir}/{report}_{YYYYmmdd_HHMMSS_mmm}.json` for aggregates and the
//! same stem with the source extension for copied input files.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::aggregate::AggregateResult;
use crate::error::{ReportError, Result};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

pub struct Archive {
    dir: PathBuf,
    retention: Duration,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            ReportError::Archive(format!("cannot create {}: {}", self.dir.display(), e))
        })
    }

    /// First free path for `{report}_{stamp}.{ext}`
    fn slot(&self, report: &str, at: DateTime<Local>, ext: &str) -> PathBuf {
        let stem = format!("{}_{}", report, at.format(STAMP_FORMAT));
        let mut path = self.dir.join(format!("{}.{}", stem, ext));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.{}", stem, n, ext));
            n += 1;
        }
        path
    }

    /// Persist an aggregate for the next run's comparison
    pub fn store(&self, result: &AggregateResult) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.slot(&result.report, result.generated_at, "json");
        let json = serde_json::to_vec_pretty(result)?;
        fs::write(&path, json)
            .map_err(|e| ReportError::Archive(format!("cannot write {}: {}", path.display(), e)))?;
        debug!("Archived aggregate to {:?}", path);
        Ok(path)
    }

    /// Keep a copy of the spreadsheet the run was computed from
    pub fn archive_source(&self, report: &str, source: &Path) -> Result<PathBuf> {
        self.ensure_dir()?;
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dat".to_string());
        let path = self.slot(report, Local::now(), &ext);
        fs::copy(source, &path).map_err(|e| {
            ReportError::Archive(format!("cannot copy {} to archive: {}", source.display(), e))
        })?;
        Ok(path)
    }

    /// Stored aggregates for `report`, oldest first
    pub fn entries(&self, report: &str) -> Result<Vec<PathBuf>> {
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_", report);
        let mut entries: Vec<PathBuf> = read
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(&prefix))
                    .is_some_and(|rest| {
                        rest.as_bytes()
                            .get(..8)
                            .is_some_and(|stamp| stamp.iter().all(u8::is_ascii_digit))
                    })
            })
            .collect();
        entries.sort();
        Ok(entries)
    }

    /// Newest readable aggregate for `report`. Cycles read this before
    /// storing their own result, so it is the last completed run.
    pub fn latest(&self, report: &str) -> Result<Option<AggregateResult>> {
        let entries = self.entries(report)?;
        for path in entries.iter().rev() {
            match fs::read(path).map_err(ReportError::from).and_then(|bytes| {
                serde_json::from_slice::<AggregateResult>(&bytes).map_err(ReportError::from)
            }) {
                Ok(result) => return Ok(Some(result)),
                Err(e) => warn!("Skipping unreadable archive entry {:?}: {}", path, e),
            }
        }
        Ok(None)
    }

    /// Delete every archived file last modified before `now - retention`
    pub fn cleanup(&self, now: SystemTime) -> Result<Vec<PathBuf>> {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return Ok(Vec::new());
        };
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = Vec::new();
        for entry in read.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified < cutoff {
                let path = entry.path();
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }

        if !removed.is_empty() {
            info!(
                "Removed {} archive files older than {} days",
                removed.len(),
                self.retention.as_secs() / 86_400
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, GroupKey, Matcher, Metric};
    use crate::models::Shipment;
    use std::fs::File;

    const WEEK: Duration = Duration::from_secs(7 * 86_400);

    fn result(report: &str, n: usize) -> AggregateResult {
        let rows: Vec<Shipment> = (0..n).map(|i| Shipment::new(i.to_string(), "SP01")).collect();
        aggregate(report, &rows, &[GroupKey::Base], &Matcher::OnTime, Metric::Count)
    }

    #[test]
    fn test_latest_is_newest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path(), WEEK);
        assert!(archive.latest("sla").unwrap().is_none());

        archive.store(&result("sla", 1)).unwrap();
        assert_eq!(archive.latest("sla").unwrap().unwrap().totals.count, 1);

        archive.store(&result("sla", 2)).unwrap();
        archive.store(&result("retidos", 9)).unwrap();
        assert_eq!(archive.latest("sla").unwrap().unwrap().totals.count, 2);
        assert_eq!(archive.latest("retidos").unwrap().unwrap().totals.count, 9);
        assert_eq!(archive.entries("sla").unwrap().len(), 2);
    }

    #[test]
    fn test_same_timestamp_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path(), WEEK);
        let r = result("sla", 1);
        let a = archive.store(&r).unwrap();
        let b = archive.store(&r).unwrap();
        assert_ne!(a, b);
        assert_eq!(archive.entries("sla").unwrap(), vec![a, b]);
    }

    #[test]
    fn test_corrupt_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path(), WEEK);
        archive.store(&result("sla", 4)).unwrap();
        fs::write(dir.path().join("sla_20990101_000000_000.json"), "{broken").unwrap();
        fs::write(dir.path().join("sla_20990101_000001_000.json"), "{}").unwrap();
        let latest = archive.latest("sla").unwrap().unwrap();
        assert_eq!(latest.totals.count, 4);
    }

    #[test]
    fn test_cleanup_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path(), WEEK);
        let old = archive.store(&result("sla", 1)).unwrap();
        let fresh = archive.store(&result("sla", 2)).unwrap();
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(8 * 86_400))
            .unwrap();

        let now = SystemTime::now();
        let removed = archive.cleanup(now).unwrap();
        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(fresh.exists());

        for entry in fs::read_dir(dir.path()).unwrap().flatten() {
            let modified = entry.metadata().unwrap().modified().unwrap();
            assert!(modified >= now - WEEK);
        }
    }

    #[test]
    fn test_archive_source_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input.csv");
        fs::write(&src, "a\n1\n").unwrap();
        let archive = Archive::new(dir.path().join("archive"), WEEK);
        let copy = archive.archive_source("sla", &src).unwrap();
        assert_eq!(fs::read_to_string(copy).unwrap(), "a\n1\n");
        assert!(archive.entries("sla").unwrap().is_empty());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let archive = Archive::new("/nonexistent/archive/dir", WEEK);
        assert!(archive.latest("sla").unwrap().is_none());
        assert!(archive.cleanup(SystemTime::now()).unwrap().is_empty());
    }
}
