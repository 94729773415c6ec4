use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::normalize::AgeBucket;

/// Raw cell value as read from a spreadsheet
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed textual form; `None` for empty cells
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
            Cell::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }
}

/// One point-in-time spreadsheet read
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source: PathBuf,
    pub captured_at: DateTime<Local>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Snapshot {
    pub fn new(source: impl AsRef<Path>, columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            captured_at: Local::now(),
            columns,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at (row, col); short rows read as empty
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Typed shipment row produced at the normalizer boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub waybill: String,
    pub base: String,
    pub status: Option<String>,
    pub days: Option<f64>,
    pub age_bucket: AgeBucket,
    pub event_time: Option<NaiveDateTime>,
    pub on_time: Option<bool>,
    pub amount: Option<f64>,
    pub category: Option<String>,
    /// Filled by the enricher; `None` when the base has no coordinator
    pub coordinator: Option<String>,
}

impl Shipment {
    pub fn new(waybill: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            waybill: waybill.into(),
            base: base.into(),
            status: None,
            days: None,
            age_bucket: AgeBucket::Invalid,
            event_time: None,
            on_time: None,
            amount: None,
            category: None,
            coordinator: None,
        }
    }

    pub fn with_days(mut self, days: f64) -> Self {
        self.days = Some(days);
        self.age_bucket = AgeBucket::from_days(Some(days));
        self
    }

    pub fn with_amount(mut self, amount: f64, category: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.category = Some(category.into());
        self
    }

    pub fn with_on_time(mut self, on_time: bool) -> Self {
        self.on_time = Some(on_time);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_text() {
        assert_eq!(Cell::from("  SP01 ").as_text().as_deref(), Some("SP01"));
        assert_eq!(Cell::from("   ").as_text(), None);
        assert_eq!(Cell::Number(42.0).as_text().as_deref(), Some("42"));
        assert_eq!(Cell::Number(1.5).as_text().as_deref(), Some("1.5"));
    }

    #[test]
    fn test_short_row_reads_empty() {
        let snap = Snapshot::new("x.csv", vec!["a".into(), "b".into()], vec![vec![Cell::from("1")]]);
        assert_eq!(snap.cell(0, 1), &Cell::Empty);
        assert_eq!(snap.cell(5, 0), &Cell::Empty);
    }
}
