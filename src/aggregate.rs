//! Group-by aggregation over enriched shipments

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::Shipment;

pub const NO_COORDINATOR: &str = "(sem coordenador)";
pub const EMPTY_VALUE: &str = "(vazio)";

/// Categorical field a report can group by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    Coordinator,
    Base,
    AgeBucket,
    Status,
    Category,
}

impl GroupKey {
    pub fn value(&self, s: &Shipment) -> String {
        let or_empty = |v: &str| {
            let t = v.trim();
            if t.is_empty() { EMPTY_VALUE.to_string() } else { t.to_string() }
        };
        match self {
            GroupKey::Coordinator => s
                .coordinator
                .clone()
                .unwrap_or_else(|| NO_COORDINATOR.to_string()),
            GroupKey::Base => or_empty(&s.base),
            GroupKey::AgeBucket => s.age_bucket.to_string(),
            GroupKey::Status => or_empty(s.status.as_deref().unwrap_or_default()),
            GroupKey::Category => or_empty(s.category.as_deref().unwrap_or_default()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GroupKey::Coordinator => "Coordenador",
            GroupKey::Base => "Base",
            GroupKey::AgeBucket => "Faixa de dias",
            GroupKey::Status => "Status",
            GroupKey::Category => "Categoria",
        }
    }
}

/// Rows that count towards `matching` (and therefore the ratio)
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    OnTime,
    /// Day count strictly greater than the threshold
    OverdueBeyond(f64),
    StatusIs(String),
    AmountAbove(f64),
}

impl Matcher {
    pub fn matches(&self, s: &Shipment) -> bool {
        match self {
            Matcher::OnTime => s.on_time == Some(true),
            Matcher::OverdueBeyond(threshold) => s.days.is_some_and(|d| d > *threshold),
            Matcher::StatusIs(label) => s.status.as_deref() == Some(label.as_str()),
            Matcher::AmountAbove(min) => s.amount.is_some_and(|a| a > *min),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Count,
    Distinct,
    Sum,
    Matching,
    Ratio,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Count,
        Metric::Distinct,
        Metric::Sum,
        Metric::Matching,
        Metric::Ratio,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Count => "Pacotes",
            Metric::Distinct => "Pedidos únicos",
            Metric::Sum => "Valor",
            Metric::Matching => "Ocorrências",
            Metric::Ratio => "Taxa",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub key: Vec<String>,
    pub count: u64,
    pub distinct: u64,
    pub sum: f64,
    pub matching: u64,
    pub ratio: f64,
    /// 1-based position in the ranked view
    pub rank: usize,
}

impl GroupRow {
    fn empty(key: Vec<String>) -> Self {
        Self {
            key,
            count: 0,
            distinct: 0,
            sum: 0.0,
            matching: 0,
            ratio: 0.0,
            rank: 0,
        }
    }

    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Count => self.count as f64,
            Metric::Distinct => self.distinct as f64,
            Metric::Sum => self.sum,
            Metric::Matching => self.matching as f64,
            Metric::Ratio => self.ratio,
        }
    }

    pub fn key_label(&self) -> String {
        self.key.join(" / ")
    }
}

/// `matching / total`, 0 when there is nothing to divide by
pub fn ratio(matching: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (matching as f64 / total as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub report: String,
    pub generated_at: DateTime<Local>,
    pub group_by: Vec<GroupKey>,
    pub rank_by: Metric,
    /// Groups in first-appearance order
    pub rows: Vec<GroupRow>,
    pub totals: GroupRow,
}

impl AggregateResult {
    pub fn row(&self, key: &[String]) -> Option<&GroupRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    /// Rows sorted by `metric` descending; ties keep groupby order
    pub fn ranked(&self, metric: Metric) -> Vec<&GroupRow> {
        let mut rows: Vec<&GroupRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| b.metric(metric).total_cmp(&a.metric(metric)));
        rows
    }

    pub fn top(&self, metric: Metric, n: usize) -> Vec<&GroupRow> {
        let mut rows = self.ranked(metric);
        rows.truncate(n);
        rows
    }
}

#[derive(Default)]
struct Accumulator {
    row: Option<GroupRow>,
    waybills: HashSet<String>,
}

impl Accumulator {
    fn add(&mut self, key: &[String], s: &Shipment, matcher: &Matcher) {
        let row = self.row.get_or_insert_with(|| GroupRow::empty(key.to_vec()));
        row.count += 1;
        row.sum += s.amount.unwrap_or(0.0);
        if matcher.matches(s) {
            row.matching += 1;
        }
        if !s.waybill.is_empty() {
            self.waybills.insert(s.waybill.clone());
        }
    }

    fn finish(self, key: Vec<String>) -> GroupRow {
        let mut row = self.row.unwrap_or_else(|| GroupRow::empty(key));
        row.distinct = self.waybills.len() as u64;
        row.ratio = ratio(row.matching, row.count);
        row
    }
}

/// Group `shipments` by one or two keys and compute count, distinct
/// waybills, amount sum, matching rows and their ratio.
pub fn aggregate(
    report: &str,
    shipments: &[Shipment],
    group_by: &[GroupKey],
    matcher: &Matcher,
    rank_by: Metric,
) -> AggregateResult {
    debug_assert!(
        (1..=2).contains(&group_by.len()),
        "reports group by one or two keys"
    );

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Accumulator> = HashMap::new();
    let mut totals = Accumulator::default();
    let total_key = vec!["Total".to_string()];

    for s in shipments {
        let key: Vec<String> = group_by.iter().map(|g| g.value(s)).collect();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key.clone()).or_default().add(&key, s, matcher);
        totals.add(&total_key, s, matcher);
    }

    let mut rows: Vec<GroupRow> = order
        .into_iter()
        .map(|key| {
            let acc = groups.remove(&key).unwrap_or_default();
            acc.finish(key)
        })
        .collect();

    // stable sort of indices keeps groupby order on ties
    let mut by_rank: Vec<usize> = (0..rows.len()).collect();
    by_rank.sort_by(|&a, &b| rows[b].metric(rank_by).total_cmp(&rows[a].metric(rank_by)));
    for (position, idx) in by_rank.into_iter().enumerate() {
        rows[idx].rank = position + 1;
    }

    AggregateResult {
        report: report.to_string(),
        generated_at: Local::now(),
        group_by: group_by.to_vec(),
        rank_by,
        rows,
        totals: totals.finish(total_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Shipment> {
        let mut rows = vec![
            Shipment::new("A1", "SP01").with_on_time(true).with_amount(10.0, "Atraso"),
            Shipment::new("A1", "SP01").with_on_time(false),
            Shipment::new("A2", "SP01").with_on_time(true),
            Shipment::new("B1", "RJ01").with_on_time(true).with_amount(5.5, "Avaria"),
            Shipment::new("C1", "MG01"),
        ];
        rows[0].coordinator = Some("Ana".into());
        rows[1].coordinator = Some("Ana".into());
        rows[2].coordinator = Some("Ana".into());
        rows[3].coordinator = Some("Bruno".into());
        rows
    }

    #[test]
    fn test_group_metrics() {
        let result = aggregate("sla", &sample(), &[GroupKey::Base], &Matcher::OnTime, Metric::Count);
        let sp = result.row(&["SP01".to_string()]).unwrap();
        assert_eq!(sp.count, 3);
        assert_eq!(sp.distinct, 2);
        assert_eq!(sp.matching, 2);
        assert!((sp.ratio - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(sp.sum, 10.0);
        assert_eq!(sp.rank, 1);

        assert_eq!(result.totals.count, 5);
        assert_eq!(result.totals.distinct, 4);
        assert_eq!(result.totals.sum, 15.5);
    }

    #[test]
    fn test_ratio_bounds() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(3, 3), 1.0);
        let result = aggregate("sla", &sample(), &[GroupKey::Base], &Matcher::OnTime, Metric::Ratio);
        for row in &result.rows {
            assert!((0.0..=1.0).contains(&row.ratio));
        }
        assert_eq!(result.row(&["MG01".to_string()]).unwrap().ratio, 0.0);
    }

    #[test]
    fn test_two_keys_and_missing_coordinator() {
        let result = aggregate(
            "sla",
            &sample(),
            &[GroupKey::Coordinator, GroupKey::Base],
            &Matcher::OnTime,
            Metric::Count,
        );
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.rows[2].key, vec![NO_COORDINATOR.to_string(), "MG01".to_string()]);
        assert_eq!(result.rows[0].key_label(), "Ana / SP01");
    }

    #[test]
    fn test_ranking_is_stable_on_ties() {
        let rows = vec![
            Shipment::new("1", "B"),
            Shipment::new("2", "A"),
            Shipment::new("3", "C"),
            Shipment::new("4", "C"),
        ];
        let result = aggregate("x", &rows, &[GroupKey::Base], &Matcher::OnTime, Metric::Count);
        let ranked: Vec<String> = result.ranked(Metric::Count).iter().map(|r| r.key_label()).collect();
        assert_eq!(ranked, vec!["C", "B", "A"]);
        assert_eq!(result.row(&["C".to_string()]).unwrap().rank, 1);
        assert_eq!(result.row(&["B".to_string()]).unwrap().rank, 2);
        assert_eq!(result.row(&["A".to_string()]).unwrap().rank, 3);

        let top: Vec<String> = result.top(Metric::Count, 2).iter().map(|r| r.key_label()).collect();
        assert_eq!(top, vec!["C", "B"]);
    }
}
