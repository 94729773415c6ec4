//! Logical field → accepted header spellings
//!
//! Exports come from several systems with Portuguese, Chinese or English
//! headers. Each report declares the logical fields it needs; the schema is
//! resolved once against the snapshot's header row.

use std::collections::HashMap;

use crate::error::{ReportError, Result};
use crate::models::{Cell, Snapshot};
use crate::normalize::normalize_key;

pub const WAYBILL: &str = "waybill";
pub const BASE: &str = "base";
pub const STATUS: &str = "status";
pub const DAYS: &str = "days";
pub const EVENT_TIME: &str = "event_time";
pub const ON_TIME: &str = "on_time";
pub const AMOUNT: &str = "amount";
pub const CATEGORY: &str = "category";
pub const COORDINATOR: &str = "coordinator";

pub const WAYBILL_HEADERS: &[&str] = &[
    "Número de pedido JMS",
    "Número do pedido",
    "Nº do pedido",
    "Remessa",
    "Número da remessa",
    "Waybill",
    "运单号",
];
pub const BASE_HEADERS: &[&str] = &[
    "Nome da base",
    "Base de entrega",
    "Base responsável",
    "Unidade responsável",
    "Base",
    "网点名称",
];
pub const STATUS_HEADERS: &[&str] = &["Status", "Status do pedido", "Tipo de problema", "状态"];
pub const DAYS_HEADERS: &[&str] = &[
    "Dias parados",
    "Dias de atraso",
    "Dias retidos",
    "Aging",
    "滞留天数",
];
pub const EVENT_TIME_HEADERS: &[&str] = &[
    "Horário da última operação",
    "Tempo de digitalização",
    "Data de entrega",
    "Data",
    "时间",
];
pub const ON_TIME_HEADERS: &[&str] = &["Entregue no prazo", "No prazo", "SLA", "是否及时"];
pub const AMOUNT_HEADERS: &[&str] = &[
    "Valor da multa",
    "Valor (R$)",
    "Multa",
    "Valor",
    "罚款金额",
];
pub const CATEGORY_HEADERS: &[&str] = &["Tipo de multa", "Motivo", "Categoria", "罚款类型"];
pub const COORDINATOR_HEADERS: &[&str] = &["Coordenadores", "Coordenador", "协调员"];

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub headers: &'static [&'static str],
    pub required: bool,
}

impl Field {
    pub fn required(name: &'static str, headers: &'static [&'static str]) -> Self {
        Self { name, headers, required: true }
    }

    pub fn optional(name: &'static str, headers: &'static [&'static str]) -> Self {
        Self { name, headers, required: false }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Map every field to a column index. The first accepted spelling that
    /// appears in the header row wins. Fails on the first required field
    /// without a match.
    pub fn resolve(&self, columns: &[String]) -> Result<ResolvedSchema> {
        let folded: Vec<String> = columns.iter().map(|c| normalize_key(c)).collect();
        let mut indices = HashMap::new();

        for field in &self.fields {
            let found = field.headers.iter().find_map(|h| {
                let wanted = normalize_key(h);
                folded.iter().position(|c| *c == wanted)
            });
            match found {
                Some(idx) => {
                    indices.insert(field.name, idx);
                }
                None if field.required => {
                    return Err(ReportError::MissingColumn {
                        field: field.name,
                        candidates: field.headers.to_vec(),
                    })
                }
                None => {}
            }
        }

        Ok(ResolvedSchema { indices })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    indices: HashMap<&'static str, usize>,
}

impl ResolvedSchema {
    pub fn has(&self, field: &str) -> bool {
        self.indices.contains_key(field)
    }

    pub fn index(&self, field: &str) -> Option<usize> {
        self.indices.get(field).copied()
    }

    /// Cell for `field` in `row`; unresolved optional fields read as empty
    pub fn cell<'a>(&self, snapshot: &'a Snapshot, row: usize, field: &str) -> Option<&'a Cell> {
        self.index(field).map(|col| snapshot.cell(row, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_accepts_variants() {
        let schema = Schema::new(vec![
            Field::required(WAYBILL, WAYBILL_HEADERS),
            Field::required(BASE, BASE_HEADERS),
            Field::optional(DAYS, DAYS_HEADERS),
        ]);
        let resolved = schema
            .resolve(&columns(&["运单号", "  NOME DA BASE ", "Outro"]))
            .unwrap();
        assert_eq!(resolved.index(WAYBILL), Some(0));
        assert_eq!(resolved.index(BASE), Some(1));
        assert!(!resolved.has(DAYS));
    }

    #[test]
    fn test_resolve_ignores_accents() {
        let schema = Schema::new(vec![Field::required(BASE, BASE_HEADERS)]);
        let resolved = schema.resolve(&columns(&["Base Responsavel"])).unwrap();
        assert_eq!(resolved.index(BASE), Some(0));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let schema = Schema::new(vec![Field::required(AMOUNT, AMOUNT_HEADERS)]);
        let err = schema.resolve(&columns(&["Remessa"])).unwrap_err();
        match err {
            ReportError::MissingColumn { field, candidates } => {
                assert_eq!(field, AMOUNT);
                assert!(candidates.contains(&"Valor da multa"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
