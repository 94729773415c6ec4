//! Base → coordinator reference table and the left join onto shipments

use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::loader;
use crate::models::{Cell, Shipment};
use crate::normalize::{normalize_key, trim_headers};
use crate::schema::{self, Field, Schema, BASE_HEADERS, COORDINATOR_HEADERS};

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub base: String,
    pub coordinator: String,
}

/// Lookup keyed by normalized base name
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, Assignment>,
}

impl ReferenceTable {
    /// Build from (base, coordinator) pairs. Later duplicates of a key are
    /// ignored so the join can never fan out.
    pub fn from_pairs<I, B, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (B, C)>,
        B: Into<String>,
        C: Into<String>,
    {
        let mut entries = HashMap::new();
        let mut duplicates = 0usize;
        for (base, coordinator) in pairs {
            let base = base.into();
            let coordinator = coordinator.into();
            let key = normalize_key(&base);
            if key.is_empty() || coordinator.trim().is_empty() {
                continue;
            }
            if entries.contains_key(&key) {
                duplicates += 1;
                continue;
            }
            entries.insert(
                key,
                Assignment {
                    base: base.trim().to_string(),
                    coordinator: coordinator.trim().to_string(),
                },
            );
        }
        if duplicates > 0 {
            warn!("Reference table has {} duplicate bases; first entry kept", duplicates);
        }
        Self { entries }
    }

    /// Load the coordinator workbook (`Nome da base` / `Coordenadores`)
    pub fn load(path: &Path, sheet: Option<&str>) -> Result<Self> {
        let mut snapshot = loader::read_snapshot(path, sheet)?;
        trim_headers(&mut snapshot);
        let resolved = Schema::new(vec![
            Field::required(schema::BASE, BASE_HEADERS),
            Field::required(schema::COORDINATOR, COORDINATOR_HEADERS),
        ])
        .resolve(&snapshot.columns)?;

        let pairs: Vec<(String, String)> = (0..snapshot.len())
            .filter_map(|row| {
                let base = resolved.cell(&snapshot, row, schema::BASE).and_then(Cell::as_text)?;
                let coordinator = resolved
                    .cell(&snapshot, row, schema::COORDINATOR)
                    .and_then(Cell::as_text)?;
                Some((base, coordinator))
            })
            .collect();

        let table = Self::from_pairs(pairs);
        info!("Loaded {} base assignments from {:?}", table.len(), path);
        Ok(table)
    }

    pub fn coordinator_for(&self, base: &str) -> Option<&str> {
        self.entries
            .get(&normalize_key(base))
            .map(|a| a.coordinator.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichOutcome {
    pub matched_rows: usize,
    pub unmatched_rows: usize,
    /// Distinct unmatched bases with their row counts, in first-seen order
    pub unmatched_bases: Vec<(String, usize)>,
}

/// Left join: every shipment is kept, unmatched ones keep `coordinator = None`
pub fn enrich(shipments: &mut [Shipment], table: &ReferenceTable) -> EnrichOutcome {
    let mut outcome = EnrichOutcome::default();
    let mut unmatched_index: HashMap<String, usize> = HashMap::new();

    for shipment in shipments.iter_mut() {
        match table.coordinator_for(&shipment.base) {
            Some(coordinator) => {
                shipment.coordinator = Some(coordinator.to_string());
                outcome.matched_rows += 1;
            }
            None => {
                shipment.coordinator = None;
                outcome.unmatched_rows += 1;
                let key = normalize_key(&shipment.base);
                match unmatched_index.get(&key) {
                    Some(&i) => outcome.unmatched_bases[i].1 += 1,
                    None => {
                        unmatched_index.insert(key, outcome.unmatched_bases.len());
                        outcome.unmatched_bases.push((shipment.base.clone(), 1));
                    }
                }
            }
        }
    }

    if outcome.unmatched_rows > 0 {
        warn!(
            "{} rows from {} bases have no coordinator",
            outcome.unmatched_rows,
            outcome.unmatched_bases.len()
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn table() -> ReferenceTable {
        ReferenceTable::from_pairs([
            ("São Paulo 01", "Ana"),
            ("RJ 02", "Bruno"),
            ("SAO PAULO 01", "Carlos"),
        ])
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let t = table();
        assert_eq!(t.len(), 2);
        assert_eq!(t.coordinator_for("sao paulo 01"), Some("Ana"));
    }

    #[test]
    fn test_enrich_preserves_rows() {
        let mut rows = vec![
            Shipment::new("1", " sao  paulo 01"),
            Shipment::new("2", "RJ 02"),
            Shipment::new("3", "MG 09"),
            Shipment::new("4", "mg 09"),
        ];
        let outcome = enrich(&mut rows, &table());

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].coordinator.as_deref(), Some("Ana"));
        assert_eq!(rows[1].coordinator.as_deref(), Some("Bruno"));
        assert_eq!(rows[2].coordinator, None);
        assert_eq!(outcome.matched_rows, 2);
        assert_eq!(outcome.unmatched_rows, 2);
        assert_eq!(outcome.unmatched_bases, vec![("MG 09".to_string(), 2)]);
    }

    #[test]
    fn test_load_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Coordenadores.csv");
        fs::write(&path, "Nome da base ,Coordenador\nSP01,Ana\nRJ02,\nMG03,Caio\n").unwrap();

        let t = ReferenceTable::load(&path, None).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.coordinator_for("mg03"), Some("Caio"));
        assert_eq!(t.coordinator_for("RJ02"), None);
    }
}
