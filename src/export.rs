//! Derived spreadsheet outputs

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::Path;
use tracing::info;

use crate::aggregate::AggregateResult;
use crate::coordinators::EnrichOutcome;
use crate::error::{ReportError, Result};
use crate::models::Shipment;

impl From<XlsxError> for ReportError {
    fn from(e: XlsxError) -> Self {
        ReportError::Export(e.to_string())
    }
}

const DETAIL_HEADERS: &[&str] = &[
    "Remessa",
    "Nome da base",
    "Coordenador",
    "Status",
    "Dias",
    "Faixa de dias",
    "Data",
    "No prazo",
    "Valor",
    "Categoria",
];

fn write_header(sheet: &mut Worksheet, headers: &[&str], bold: &Format) -> Result<()> {
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, bold)?;
    }
    Ok(())
}

fn write_opt_str(sheet: &mut Worksheet, row: u32, col: u16, value: Option<&str>) -> Result<()> {
    if let Some(v) = value {
        sheet.write_string(row, col, v)?;
    }
    Ok(())
}

fn write_opt_num(sheet: &mut Worksheet, row: u32, col: u16, value: Option<f64>) -> Result<()> {
    if let Some(v) = value {
        sheet.write_number(row, col, v)?;
    }
    Ok(())
}

/// Workbook with every enriched row on `detail_sheet` and the aggregate on
/// `summary_sheet`
pub fn write_workbook(
    path: &Path,
    shipments: &[Shipment],
    aggregate: &AggregateResult,
    detail_sheet: &str,
    summary_sheet: &str,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let money = Format::new().set_num_format("#,##0.00");
    let pct = Format::new().set_num_format("0.00%");

    let detail = workbook.add_worksheet();
    detail.set_name(detail_sheet)?;
    write_header(detail, DETAIL_HEADERS, &bold)?;
    for (i, s) in shipments.iter().enumerate() {
        let row = i as u32 + 1;
        detail.write_string(row, 0, &s.waybill)?;
        detail.write_string(row, 1, &s.base)?;
        write_opt_str(detail, row, 2, s.coordinator.as_deref())?;
        write_opt_str(detail, row, 3, s.status.as_deref())?;
        write_opt_num(detail, row, 4, s.days)?;
        detail.write_string(row, 5, s.age_bucket.to_string())?;
        let date = s.event_time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        write_opt_str(detail, row, 6, date.as_deref())?;
        write_opt_str(detail, row, 7, s.on_time.map(|b| if b { "Sim" } else { "Não" }))?;
        if let Some(amount) = s.amount {
            detail.write_number_with_format(row, 8, amount, &money)?;
        }
        write_opt_str(detail, row, 9, s.category.as_deref())?;
    }

    let summary = workbook.add_worksheet();
    summary.set_name(summary_sheet)?;
    let mut headers: Vec<&str> = aggregate.group_by.iter().map(|g| g.label()).collect();
    headers.extend(["Pacotes", "Pedidos únicos", "Valor", "Ocorrências", "Taxa", "Posição"]);
    write_header(summary, &headers, &bold)?;

    let keys = aggregate.group_by.len() as u16;
    let all_rows = aggregate.rows.iter().chain(std::iter::once(&aggregate.totals));
    for (i, r) in all_rows.enumerate() {
        let row = i as u32 + 1;
        for (col, value) in r.key.iter().enumerate() {
            summary.write_string(row, col as u16, value)?;
        }
        summary.write_number(row, keys, r.count as f64)?;
        summary.write_number(row, keys + 1, r.distinct as f64)?;
        summary.write_number_with_format(row, keys + 2, r.sum, &money)?;
        summary.write_number(row, keys + 3, r.matching as f64)?;
        summary.write_number_with_format(row, keys + 4, r.ratio, &pct)?;
        if r.rank > 0 {
            summary.write_number(row, keys + 5, r.rank as f64)?;
        }
    }

    workbook.save(path)?;
    info!("Wrote {} rows to {:?}", shipments.len(), path);
    Ok(())
}

/// Side report of bases without a coordinator
pub fn write_unmatched_csv(path: &Path, outcome: &EnrichOutcome) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Nome da base", "Linhas"])?;
    for (base, rows) in &outcome.unmatched_bases {
        writer.write_record([base.as_str(), rows.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}
