//! Current vs previous aggregate

use chrono::{DateTime, Local};
use std::collections::HashSet;

use crate::aggregate::{AggregateResult, GroupRow, Metric};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increased,
    Decreased,
    Unchanged,
}

impl Direction {
    pub fn of(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Increased
        } else if delta < 0.0 {
            Direction::Decreased
        } else {
            Direction::Unchanged
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Direction::Increased => "🔺",
            Direction::Decreased => "🔻",
            Direction::Unchanged => "➖",
        }
    }
}

/// Whether a rising metric is good news for the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improved,
    Worsened,
    Unchanged,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::Improved => "melhorou",
            Trend::Worsened => "piorou",
            Trend::Unchanged => "sem alteração",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDelta {
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub direction: Direction,
}

impl MetricDelta {
    pub fn new(current: f64, previous: f64) -> Self {
        let delta = current - previous;
        Self {
            current,
            previous,
            delta,
            direction: Direction::of(delta),
        }
    }

    pub fn trend(&self, polarity: Polarity) -> Trend {
        match (self.direction, polarity) {
            (Direction::Unchanged, _) => Trend::Unchanged,
            (Direction::Increased, Polarity::HigherIsBetter)
            | (Direction::Decreased, Polarity::LowerIsBetter) => Trend::Improved,
            _ => Trend::Worsened,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub key: Vec<String>,
    pub rank: usize,
    /// Key absent from the previous aggregate; deltas are a zero baseline
    pub is_new: bool,
    deltas: [MetricDelta; 5],
}

impl ComparisonRow {
    fn build(current: &GroupRow, previous: Option<&GroupRow>) -> Self {
        let baseline = previous.unwrap_or(current);
        Self {
            key: current.key.clone(),
            rank: current.rank,
            is_new: previous.is_none(),
            deltas: Metric::ALL.map(|m| MetricDelta::new(current.metric(m), baseline.metric(m))),
        }
    }

    pub fn get(&self, metric: Metric) -> &MetricDelta {
        let idx = Metric::ALL
            .iter()
            .position(|m| *m == metric)
            .unwrap_or_default();
        &self.deltas[idx]
    }

    pub fn key_label(&self) -> String {
        self.key.join(" / ")
    }
}

#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub current: AggregateResult,
    pub previous_at: Option<DateTime<Local>>,
    pub polarity: Polarity,
    /// Same order as `current.rows`
    pub rows: Vec<ComparisonRow>,
    pub totals: ComparisonRow,
    /// Keys present last time but gone now
    pub dropped: Vec<Vec<String>>,
}

impl ComparisonResult {
    pub fn has_history(&self) -> bool {
        self.previous_at.is_some()
    }

    pub fn row(&self, key: &[String]) -> Option<&ComparisonRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    /// Rows ordered by the current value of `metric`, descending, stable
    pub fn ranked(&self, metric: Metric) -> Vec<&ComparisonRow> {
        let mut rows: Vec<&ComparisonRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| b.get(metric).current.total_cmp(&a.get(metric).current));
        rows
    }
}

/// Diff `current` against `previous`. Without history every key is new and
/// every delta is zero.
pub fn compare(
    current: AggregateResult,
    previous: Option<&AggregateResult>,
    polarity: Polarity,
) -> ComparisonResult {
    let rows: Vec<ComparisonRow> = current
        .rows
        .iter()
        .map(|row| ComparisonRow::build(row, previous.and_then(|p| p.row(&row.key))))
        .collect();

    let totals = ComparisonRow::build(&current.totals, previous.map(|p| &p.totals));

    let dropped = match previous {
        Some(prev) => {
            let keys: HashSet<&Vec<String>> = current.rows.iter().map(|r| &r.key).collect();
            prev.rows
                .iter()
                .filter(|r| !keys.contains(&r.key))
                .map(|r| r.key.clone())
                .collect()
        }
        None => Vec::new(),
    };

    ComparisonResult {
        previous_at: previous.map(|p| p.generated_at),
        current,
        polarity,
        rows,
        totals,
        dropped,
    }
}
