//! Spreadsheet discovery and reading
//!
//! Reports never name their input exactly: the newest export matching a
//! filename pattern in the input directory wins.

use calamine::{open_workbook_auto, Data, DataType, Reader};
use csv::ReaderBuilder;
use encoding_rs::WINDOWS_1252;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::error::{ReportError, Result};
use crate::models::{Cell, Snapshot};

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Locate the most recently modified file in `dir` matching `pattern`.
///
/// `pattern` is a glob (`*retidos*.xlsx`); a pattern without glob
/// metacharacters is treated as a filename prefix. Matching ignores case.
pub fn find_latest(dir: &Path, pattern: &str) -> Result<PathBuf> {
    let glob_pattern = compile_pattern(pattern)?;
    let not_found = || ReportError::NotFound {
        dir: dir.to_path_buf(),
        pattern: pattern.to_string(),
    };

    let entries = fs::read_dir(dir).map_err(|_| not_found())?;

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        // Excel lock files
        if name.starts_with("~$") || !glob_pattern.matches_with(&name, MATCH_OPTIONS) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = match &best {
            None => true,
            Some((t, p)) => modified > *t || (modified == *t && path > *p),
        };
        if newer {
            best = Some((modified, path));
        }
    }

    let (_, path) = best.ok_or_else(not_found)?;
    debug!("Selected {:?} for pattern '{}'", path, pattern);
    Ok(path)
}

fn compile_pattern(pattern: &str) -> Result<glob::Pattern> {
    let expanded = if pattern.contains(['*', '?', '[']) {
        pattern.to_string()
    } else {
        format!("{}*", pattern)
    };
    glob::Pattern::new(&expanded)
        .map_err(|e| ReportError::Config(format!("bad file pattern '{}': {}", pattern, e)))
}

/// Read a CSV or Excel file into a snapshot. `sheet` defaults to the first sheet.
pub fn read_snapshot(path: &Path, sheet: Option<&str>) -> Result<Snapshot> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let snapshot = match ext.as_str() {
        "csv" | "txt" => read_csv(path)?,
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_workbook(path, sheet)?,
        other => {
            return Err(ReportError::read(
                path,
                format!("unsupported file type '{}'", other),
            ))
        }
    };

    info!(
        "Read {} rows x {} columns from {}",
        snapshot.len(),
        snapshot.columns.len(),
        snapshot.file_name()
    );
    Ok(snapshot)
}

fn read_csv(path: &Path) -> Result<Snapshot> {
    let bytes = fs::read(path).map_err(|e| ReportError::read(path, e))?;
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes[..]);
    let text = decode_text(bytes);
    if matches!(text, Cow::Owned(_)) {
        warn!("{:?} is not UTF-8, decoded as Windows-1252", path);
    }
    let bytes = text.as_bytes();

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(sniff_delimiter(bytes))
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ReportError::read(path, e))?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ReportError::read(path, e))?;
        let row: Vec<Cell> = record.iter().map(Cell::from).collect();
        if row.iter().all(Cell::is_empty) {
            continue;
        }
        rows.push(row);
    }

    Ok(Snapshot::new(path, columns, rows))
}

/// UTF-8 when valid, otherwise Windows-1252 (legacy Excel "CSV" exports)
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

/// Brazilian exports use `;` as the field separator
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let header = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let semicolons = header.iter().filter(|b| **b == b';').count();
    let commas = header.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn read_workbook(path: &Path, sheet: Option<&str>) -> Result<Snapshot> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ReportError::read(path, e))?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ReportError::read(path, "workbook has no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ReportError::read(path, format!("sheet '{}': {}", sheet_name, e)))?;

    let mut rows_iter = range.rows();
    let header = rows_iter
        .next()
        .ok_or_else(|| ReportError::read(path, format!("sheet '{}' is empty", sheet_name)))?;
    let columns: Vec<String> = header.iter().map(|c| c.to_string()).collect();

    let rows: Vec<Vec<Cell>> = rows_iter
        .map(|r| r.iter().map(convert_cell).collect::<Vec<_>>())
        .filter(|r: &Vec<Cell>| !r.iter().all(Cell::is_empty))
        .collect();

    Ok(Snapshot::new(path, columns, rows))
}

fn convert_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::from(s.as_str()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(_) | Data::DateTimeIso(_) => {
            data.as_datetime().map(Cell::DateTime).unwrap_or(Cell::Empty)
        }
        Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}
