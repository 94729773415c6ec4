//! Snapshot normalization: header cleanup, coded values, dates and aging
//!
//! Converts a raw [`Snapshot`] into typed [`Shipment`] records. Cell-level
//! parse failures never abort the report; they become `None`.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::error::Result;
use crate::models::{Cell, Shipment, Snapshot};
use crate::schema::{self, Schema};

/// Two-character status codes used by the operational exports
pub static STATUS_LABELS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("EN", "Entregue");
    m.insert("DV", "Devolvido");
    m.insert("RT", "Retido");
    m.insert("TR", "Em trânsito");
    m.insert("SA", "Saiu para entrega");
    m.insert("PR", "Problemático");
    m.insert("EX", "Extraviado");
    m.insert("AG", "Aguardando retirada");
    m
});

/// Translate a coded status; unknown values pass through trimmed
pub fn translate_status(raw: &str) -> String {
    let trimmed = raw.trim();
    STATUS_LABELS
        .get(trimmed.to_ascii_uppercase().as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Canonical key for joins and header matching: trimmed, inner whitespace
/// collapsed, diacritics stripped, uppercased.
pub fn normalize_key(s: &str) -> String {
    let stripped: String = s.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

pub fn trim_headers(snapshot: &mut Snapshot) {
    for column in &mut snapshot.columns {
        let trimmed = column.trim();
        if trimmed.len() != column.len() {
            *column = trimmed.to_string();
        }
    }
}

// ============================================================================
// Cell coercion
// ============================================================================

/// Parse numbers in either decimal convention (`1.234,5`, `1234.5`, `R$ 12,00`)
pub fn parse_number(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) if n.is_finite() => Some(*n),
        Cell::Text(s) => parse_number_text(s),
        Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn parse_number_text(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let canonical = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };
    canonical.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Money values from BRL exports. A lone `.` followed by exactly three
/// digits (`1.234`, `R$ 12.500`) is a thousands separator there, not a
/// decimal point; everything else parses like [`parse_number`].
pub fn parse_amount(cell: &Cell) -> Option<f64> {
    if let Cell::Text(s) = cell {
        let cleaned: String = s
            .trim()
            .trim_start_matches("R$")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let digits = cleaned.strip_prefix('-').unwrap_or(&cleaned);
        if let Some((int, frac)) = digits.split_once('.') {
            let grouped = !int.is_empty()
                && int.len() <= 3
                && !int.starts_with('0')
                && frac.len() == 3
                && int.chars().chain(frac.chars()).all(|c| c.is_ascii_digit());
            if grouped {
                return cleaned.replace('.', "").parse::<f64>().ok();
            }
        }
    }
    parse_number(cell)
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// Parse native datetimes, spreadsheet serial numbers and common text formats
pub fn parse_datetime(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::DateTime(dt) => Some(*dt),
        Cell::Number(serial) => from_excel_serial(*serial),
        Cell::Text(s) => {
            let s = s.trim();
            DATE_TIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    // 1..=2958465 covers 1900-01-01 to 9999-12-31
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

/// Parse yes/no style flags
pub fn parse_flag(cell: &Cell) -> Option<bool> {
    match cell {
        Cell::Bool(b) => Some(*b),
        Cell::Number(n) if *n == 1.0 => Some(true),
        Cell::Number(n) if *n == 0.0 => Some(false),
        Cell::Text(s) => match normalize_key(s).as_str() {
            "SIM" | "S" | "YES" | "Y" | "TRUE" | "1" | "NO PRAZO" | "是" => Some(true),
            "NAO" | "N" | "NO" | "FALSE" | "0" | "ATRASADO" | "FORA DO PRAZO" | "否" => {
                Some(false)
            }
            _ => None,
        },
        _ => None,
    }
}

// ============================================================================
// Age buckets
// ============================================================================

/// Categorical band for "days stalled/overdue"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeBucket {
    /// Fewer than 7 days, exact
    Days(u8),
    From7To9,
    From10To13,
    From14To29,
    Over30,
    Invalid,
}

impl AgeBucket {
    pub fn from_days(days: Option<f64>) -> Self {
        let Some(d) = days.filter(|d| d.is_finite() && *d >= 0.0) else {
            return AgeBucket::Invalid;
        };
        let whole = d.floor();
        if whole < 7.0 {
            AgeBucket::Days(whole as u8)
        } else if whole < 10.0 {
            AgeBucket::From7To9
        } else if whole < 14.0 {
            AgeBucket::From10To13
        } else if whole < 30.0 {
            AgeBucket::From14To29
        } else {
            AgeBucket::Over30
        }
    }
}

impl fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeBucket::Days(1) => write!(f, "1 dia"),
            AgeBucket::Days(d) => write!(f, "{} dias", d),
            AgeBucket::From7To9 => write!(f, "7-9 dias"),
            AgeBucket::From10To13 => write!(f, "10-13 dias"),
            AgeBucket::From14To29 => write!(f, "14-29 dias"),
            AgeBucket::Over30 => write!(f, "30+ dias"),
            AgeBucket::Invalid => write!(f, "Inválido"),
        }
    }
}

// ============================================================================
// Snapshot → Shipments
// ============================================================================

/// Normalize a snapshot into typed shipments.
///
/// When the snapshot has no day-count column but carries an event time, the
/// day count is derived from `as_of`.
pub fn normalize(snapshot: &mut Snapshot, schema: &Schema, as_of: NaiveDate) -> Result<Vec<Shipment>> {
    trim_headers(snapshot);
    let resolved = schema.resolve(&snapshot.columns)?;
    let snap: &Snapshot = snapshot;

    let text = |row: usize, field: &str| resolved.cell(snap, row, field).and_then(Cell::as_text);

    let mut shipments = Vec::with_capacity(snap.len());
    let mut blank = 0usize;
    let mut bad_days = 0usize;

    for row in 0..snap.len() {
        let waybill = text(row, schema::WAYBILL).unwrap_or_default();
        let base = text(row, schema::BASE).unwrap_or_default();
        if waybill.is_empty() && base.is_empty() {
            blank += 1;
            continue;
        }

        let event_time = resolved
            .cell(snap, row, schema::EVENT_TIME)
            .and_then(parse_datetime);

        let days = match resolved.cell(snap, row, schema::DAYS) {
            Some(cell) => {
                let parsed = parse_number(cell);
                if parsed.is_none() && !cell.is_empty() {
                    bad_days += 1;
                }
                parsed
            }
            None => event_time.map(|t| (as_of - t.date()).num_days() as f64),
        };

        shipments.push(Shipment {
            waybill,
            base,
            status: text(row, schema::STATUS).map(|s| translate_status(&s)),
            days,
            age_bucket: AgeBucket::from_days(days),
            event_time,
            on_time: resolved.cell(snap, row, schema::ON_TIME).and_then(parse_flag),
            amount: resolved.cell(snap, row, schema::AMOUNT).and_then(parse_amount),
            category: text(row, schema::CATEGORY),
            coordinator: None,
        });
    }

    if blank > 0 {
        warn!("Skipped {} blank rows in {}", blank, snap.file_name());
    }
    if bad_days > 0 {
        warn!("{} rows with unparseable day counts bucketed as invalid", bad_days);
    }
    debug!("Normalized {} shipments", shipments.len());

    Ok(shipments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, BASE_HEADERS, DAYS_HEADERS, EVENT_TIME_HEADERS, WAYBILL_HEADERS};

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  São   Paulo "), "SAO PAULO");
        assert_eq!(normalize_key("são paulo"), normalize_key("SAO PAULO"));
        assert_eq!(normalize_key("Jundiaí-01"), "JUNDIAI-01");
    }

    #[test]
    fn test_translate_status() {
        assert_eq!(translate_status("rt"), "Retido");
        assert_eq!(translate_status(" EN "), "Entregue");
        assert_eq!(translate_status("Aguardando"), "Aguardando");
    }

    #[test]
    fn test_age_buckets() {
        assert_eq!(AgeBucket::from_days(Some(0.0)), AgeBucket::Days(0));
        assert_eq!(AgeBucket::from_days(Some(6.9)), AgeBucket::Days(6));
        assert_eq!(AgeBucket::from_days(Some(7.0)), AgeBucket::From7To9);
        assert_eq!(AgeBucket::from_days(Some(9.0)), AgeBucket::From7To9);
        assert_eq!(AgeBucket::from_days(Some(10.0)), AgeBucket::From10To13);
        assert_eq!(AgeBucket::from_days(Some(13.0)), AgeBucket::From10To13);
        assert_eq!(AgeBucket::from_days(Some(14.0)), AgeBucket::From14To29);
        assert_eq!(AgeBucket::from_days(Some(29.0)), AgeBucket::From14To29);
        assert_eq!(AgeBucket::from_days(Some(30.0)), AgeBucket::Over30);
        assert_eq!(AgeBucket::from_days(Some(-1.0)), AgeBucket::Invalid);
        assert_eq!(AgeBucket::from_days(Some(f64::NAN)), AgeBucket::Invalid);
        assert_eq!(AgeBucket::from_days(None), AgeBucket::Invalid);
        assert_eq!(AgeBucket::Days(3).to_string(), "3 dias");
        assert_eq!(AgeBucket::Over30.to_string(), "30+ dias");
    }

    #[test]
    fn test_parse_number_conventions() {
        assert_eq!(parse_number(&Cell::from("1.234,50")), Some(1234.5));
        assert_eq!(parse_number(&Cell::from("1,234.50")), Some(1234.5));
        assert_eq!(parse_number(&Cell::from("R$ 12,00")), Some(12.0));
        assert_eq!(parse_number(&Cell::from("12.5")), Some(12.5));
        assert_eq!(parse_number(&Cell::from("1.000.000")), Some(1_000_000.0));
        assert_eq!(parse_number(&Cell::from("abc")), None);
        assert_eq!(parse_number(&Cell::Empty), None);
    }

    #[test]
    fn test_parse_amount_thousands() {
        assert_eq!(parse_amount(&Cell::from("1.234")), Some(1234.0));
        assert_eq!(parse_amount(&Cell::from("R$ 12.500")), Some(12_500.0));
        assert_eq!(parse_amount(&Cell::from("-1.234")), Some(-1234.0));
        assert_eq!(parse_amount(&Cell::from("0.125")), Some(0.125));
        assert_eq!(parse_amount(&Cell::from("12.50")), Some(12.5));
        assert_eq!(parse_amount(&Cell::from("1.234,56")), Some(1234.56));
        assert_eq!(parse_amount(&Cell::Number(1.234)), Some(1.234));
        // the general parser keeps the decimal reading
        assert_eq!(parse_number(&Cell::from("1.234")), Some(1.234));
    }

    #[test]
    fn test_parse_datetime() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_datetime(&Cell::from("05/03/2024")), Some(expected));
        assert_eq!(parse_datetime(&Cell::from("2024-03-05")), Some(expected));
        assert_eq!(parse_datetime(&Cell::Number(45356.0)), Some(expected));
        assert_eq!(parse_datetime(&Cell::from("ontem")), None);
        assert_eq!(parse_datetime(&Cell::Number(-3.0)), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(&Cell::from("Sim")), Some(true));
        assert_eq!(parse_flag(&Cell::from("não")), Some(false));
        assert_eq!(parse_flag(&Cell::from("Atrasado")), Some(false));
        assert_eq!(parse_flag(&Cell::Number(1.0)), Some(true));
        assert_eq!(parse_flag(&Cell::from("talvez")), None);
    }

    #[test]
    fn test_normalize_snapshot() {
        let mut snap = Snapshot::new(
            "retidos.csv",
            vec![" Remessa ".into(), "Nome da base".into(), "Dias parados".into()],
            vec![
                vec![Cell::from("JT1"), Cell::from("SP01"), Cell::from("3")],
                vec![Cell::from("JT2"), Cell::from("SP01"), Cell::from("n/d")],
                vec![Cell::Empty, Cell::Empty, Cell::from("1")],
                vec![Cell::from("JT3"), Cell::from("SP02"), Cell::Number(31.0)],
            ],
        );
        let schema = Schema::new(vec![
            Field::required(schema::WAYBILL, WAYBILL_HEADERS),
            Field::required(schema::BASE, BASE_HEADERS),
            Field::optional(schema::DAYS, DAYS_HEADERS),
        ]);
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let shipments = normalize(&mut snap, &schema, as_of).unwrap();

        assert_eq!(snap.columns[0], "Remessa");
        assert_eq!(shipments.len(), 3);
        assert_eq!(shipments[0].age_bucket, AgeBucket::Days(3));
        assert_eq!(shipments[1].age_bucket, AgeBucket::Invalid);
        assert_eq!(shipments[2].age_bucket, AgeBucket::Over30);
    }

    #[test]
    fn test_days_derived_from_event_time() {
        let mut snap = Snapshot::new(
            "x.csv",
            vec!["Remessa".into(), "Base".into(), "Data".into()],
            vec![vec![Cell::from("JT1"), Cell::from("RJ01"), Cell::from("2024-03-01")]],
        );
        let schema = Schema::new(vec![
            Field::required(schema::WAYBILL, WAYBILL_HEADERS),
            Field::required(schema::BASE, BASE_HEADERS),
            Field::optional(schema::EVENT_TIME, EVENT_TIME_HEADERS),
        ]);
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let shipments = normalize(&mut snap, &schema, as_of).unwrap();
        assert_eq!(shipments[0].days, Some(10.0));
        assert_eq!(shipments[0].age_bucket, AgeBucket::From10To13);
    }
}
