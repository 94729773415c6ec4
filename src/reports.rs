//! Built-in report definitions
//!
//! Each report is a declaration: where its export lives, which headers it
//! needs, how it groups, what counts as a "hit" and which optional card
//! sections it renders.

use crate::aggregate::{GroupKey, Matcher, Metric};
use crate::compare::Polarity;
use crate::schema::*;

/// Per-group amount totals with nested top categories
#[derive(Debug, Clone)]
pub struct FinesSummary {
    pub group_by: GroupKey,
    pub max_groups: usize,
    pub top_categories: usize,
}

/// Worst groups by number of rows beyond a day threshold
#[derive(Debug, Clone)]
pub struct OverdueWarning {
    pub group_by: GroupKey,
    pub threshold_days: f64,
    pub top_n: usize,
}

#[derive(Debug, Clone)]
pub struct ReportDefinition {
    pub name: &'static str,
    pub title: &'static str,
    pub file_pattern: &'static str,
    pub sheet: Option<&'static str>,
    pub schema: Schema,
    pub group_by: Vec<GroupKey>,
    pub matcher: Matcher,
    pub headline: Metric,
    pub polarity: Polarity,
    /// Groups listed in the card body
    pub max_rows: usize,
    pub fines: Option<FinesSummary>,
    pub overdue: Option<OverdueWarning>,
    /// Webhook target names; resolved through the configuration
    pub webhooks: Vec<&'static str>,
    pub detail_sheet: &'static str,
    pub summary_sheet: &'static str,
}

/// Retained packages aging by coordinator and base
pub fn retained() -> ReportDefinition {
    ReportDefinition {
        name: "retidos",
        title: "📦 Pacotes retidos por coordenador",
        file_pattern: "*retidos*",
        sheet: None,
        schema: Schema::new(vec![
            Field::required(WAYBILL, WAYBILL_HEADERS),
            Field::required(BASE, BASE_HEADERS),
            Field::optional(DAYS, DAYS_HEADERS),
            Field::optional(EVENT_TIME, EVENT_TIME_HEADERS),
            Field::optional(STATUS, STATUS_HEADERS),
        ]),
        group_by: vec![GroupKey::Coordinator, GroupKey::Base],
        matcher: Matcher::OverdueBeyond(15.0),
        headline: Metric::Matching,
        polarity: Polarity::LowerIsBetter,
        max_rows: 15,
        fines: None,
        overdue: Some(OverdueWarning {
            group_by: GroupKey::Base,
            threshold_days: 15.0,
            top_n: 5,
        }),
        webhooks: vec!["retidos"],
        detail_sheet: "Dados_Completos",
        summary_sheet: "ResumoNumerico",
    }
}

/// On-time delivery rate per coordinator
pub fn sla() -> ReportDefinition {
    ReportDefinition {
        name: "sla",
        title: "⏱️ SLA de entrega por coordenador",
        file_pattern: "*sla*",
        sheet: None,
        schema: Schema::new(vec![
            Field::required(WAYBILL, WAYBILL_HEADERS),
            Field::required(BASE, BASE_HEADERS),
            Field::required(ON_TIME, ON_TIME_HEADERS),
            Field::optional(EVENT_TIME, EVENT_TIME_HEADERS),
        ]),
        group_by: vec![GroupKey::Coordinator],
        matcher: Matcher::OnTime,
        headline: Metric::Ratio,
        polarity: Polarity::HigherIsBetter,
        max_rows: 20,
        fines: None,
        overdue: None,
        webhooks: vec!["sla"],
        detail_sheet: "Dados_Completos",
        summary_sheet: "ResumoNumerico",
    }
}

/// Fine amounts per coordinator, with a per-base category breakdown
pub fn fines() -> ReportDefinition {
    ReportDefinition {
        name: "multas",
        title: "💸 Multas por coordenador",
        file_pattern: "*multa*",
        sheet: None,
        schema: Schema::new(vec![
            Field::required(WAYBILL, WAYBILL_HEADERS),
            Field::required(BASE, BASE_HEADERS),
            Field::required(AMOUNT, AMOUNT_HEADERS),
            Field::optional(CATEGORY, CATEGORY_HEADERS),
        ]),
        group_by: vec![GroupKey::Coordinator],
        matcher: Matcher::AmountAbove(0.0),
        headline: Metric::Sum,
        polarity: Polarity::LowerIsBetter,
        max_rows: 10,
        fines: Some(FinesSummary {
            group_by: GroupKey::Base,
            max_groups: 10,
            top_categories: 3,
        }),
        overdue: None,
        webhooks: vec!["multas"],
        detail_sheet: "Multas_Detalhe",
        summary_sheet: "Multas_Resumo",
    }
}

pub fn builtin() -> Vec<ReportDefinition> {
    vec![retained(), sla(), fines()]
}

pub fn find(name: &str) -> Option<ReportDefinition> {
    builtin().into_iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let defs = builtin();
        for (i, a) in defs.iter().enumerate() {
            for b in &defs[i + 1..] {
                assert_ne!(a.name, b.name);
            }
            assert!((1..=2).contains(&a.group_by.len()));
        }
    }

    #[test]
    fn test_find_is_case_insensitive() {
        assert_eq!(find("SLA").map(|d| d.name), Some("sla"));
        assert!(find("desconhecido").is_none());
    }
}
