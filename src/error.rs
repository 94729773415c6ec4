//! Error taxonomy shared by every pipeline stage

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    /// No file in `dir` matched the report's pattern
    #[error("no file matching '{pattern}' in {dir}")]
    NotFound { dir: PathBuf, pattern: String },

    /// Spreadsheet could not be read (corrupt workbook, missing sheet, bad extension)
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("required field '{field}' not found; accepted headers: {}", candidates.join(", "))]
    MissingColumn {
        field: &'static str,
        candidates: Vec<&'static str>,
    },

    #[error("invalid webhook url '{url}': {reason}")]
    InvalidWebhook { url: String, reason: String },

    /// Webhook reachable but rejected the message
    #[error("webhook '{target}' rejected message: {reason}")]
    Webhook { target: String, reason: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("export error: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ReportError {
    pub(crate) fn read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ReportError::Read {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Input-missing errors skip the report with a warning instead of an error log
    pub fn is_input_missing(&self) -> bool {
        matches!(
            self,
            ReportError::NotFound { .. } | ReportError::MissingColumn { .. }
        )
    }
}
