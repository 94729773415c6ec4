//! Message formatting: number rendering and Feishu card payloads

use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::aggregate::{GroupKey, Metric, EMPTY_VALUE};
use crate::compare::{ComparisonResult, MetricDelta, Trend};
use crate::models::Shipment;
use crate::reports::{FinesSummary, OverdueWarning, ReportDefinition};

// ============================================================================
// Number formatting
// ============================================================================

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

/// Two decimals, `.` thousands and `,` decimal: `1234.5` → `1.234,50`
pub fn format_brl(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}{},{:02}", sign, group_thousands(cents / 100), cents % 100)
}

pub fn format_count(value: f64) -> String {
    let rounded = value.round();
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{}{}", sign, group_thousands(rounded.abs() as u64))
}

/// Ratio in [0, 1] as a percentage with decimal comma: `0.9375` → `93,75%`
pub fn format_pct(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0).replace('.', ",")
}

pub fn format_metric(metric: Metric, value: f64) -> String {
    match metric {
        Metric::Count | Metric::Distinct | Metric::Matching => format_count(value),
        Metric::Sum => format!("R$ {}", format_brl(value)),
        Metric::Ratio => format_pct(value),
    }
}

/// Signed delta; ratio deltas are in percentage points
pub fn format_delta(metric: Metric, delta: f64) -> String {
    let sign = if delta > 0.0 {
        "+"
    } else if delta < 0.0 {
        "-"
    } else {
        ""
    };
    let magnitude = match metric {
        Metric::Ratio => format!("{} p.p.", format_brl(delta.abs() * 100.0)),
        Metric::Sum => format!("R$ {}", format_brl(delta.abs())),
        _ => format_count(delta.abs()),
    };
    format!("{}{}", sign, magnitude)
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderColor {
    Blue,
    Green,
    Orange,
    Red,
}

impl HeaderColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderColor::Blue => "blue",
            HeaderColor::Green => "green",
            HeaderColor::Orange => "orange",
            HeaderColor::Red => "red",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub title: String,
    pub generated_at: DateTime<Local>,
    pub color: HeaderColor,
    pub sections: Vec<Section>,
    pub link: Option<LinkButton>,
}

impl NotificationPayload {
    pub fn section(&self, heading_prefix: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.heading.starts_with(heading_prefix))
    }

    /// Feishu interactive card body
    pub fn to_card(&self) -> Value {
        let mut elements = vec![json!({
            "tag": "div",
            "text": {
                "tag": "lark_md",
                "content": format!("🕒 Gerado em: {}", self.generated_at.format("%Y-%m-%d %H:%M")),
            }
        })];

        for section in &self.sections {
            elements.push(json!({ "tag": "hr" }));
            elements.push(json!({
                "tag": "div",
                "text": {
                    "tag": "lark_md",
                    "content": format!("**{}**\n{}", section.heading, section.lines.join("\n")),
                }
            }));
        }

        if let Some(link) = &self.link {
            elements.push(json!({
                "tag": "action",
                "actions": [{
                    "tag": "button",
                    "text": { "tag": "plain_text", "content": link.text },
                    "url": link.url,
                    "type": "primary",
                }]
            }));
        }

        json!({
            "msg_type": "interactive",
            "card": {
                "config": { "wide_screen_mode": true },
                "header": {
                    "title": { "tag": "plain_text", "content": self.title },
                    "template": self.color.as_str(),
                },
                "elements": elements,
            }
        })
    }

    /// Plain-text rendering for logs and dry runs
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{}\nGerado em: {}\n",
            self.title,
            self.generated_at.format("%Y-%m-%d %H:%M")
        );
        for section in &self.sections {
            out.push_str(&format!("\n{}\n", section.heading));
            for line in &section.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        if let Some(link) = &self.link {
            out.push_str(&format!("\n{}: {}\n", link.text, link.url));
        }
        out
    }
}

fn delta_suffix(delta: &MetricDelta, metric: Metric, show: bool) -> String {
    if !show {
        return String::new();
    }
    format!(" {} {}", delta.direction.icon(), format_delta(metric, delta.delta))
}

/// Render a comparison into a card. Optional sections are omitted when the
/// shipments carry no data for them.
pub fn build_payload(
    def: &ReportDefinition,
    comparison: &ComparisonResult,
    shipments: &[Shipment],
    link: Option<&str>,
) -> NotificationPayload {
    let history = comparison.has_history();
    let headline = def.headline;
    let totals = &comparison.totals;
    let total_delta = totals.get(headline);
    let trend = total_delta.trend(comparison.polarity);

    let mut summary = vec![format!(
        "Total de pacotes: **{}**{}",
        format_count(totals.get(Metric::Count).current),
        delta_suffix(totals.get(Metric::Count), Metric::Count, history)
    )];
    summary.push(format!(
        "{}: **{}**{}",
        headline.label(),
        format_metric(headline, total_delta.current),
        delta_suffix(total_delta, headline, history)
    ));
    if history {
        summary.push(format!("Tendência: {}", trend.label()));
    } else {
        summary.push("Sem histórico anterior para comparação".to_string());
    }

    let mut sections = vec![Section {
        heading: "📊 Resumo".to_string(),
        lines: summary,
    }];

    let group_label = comparison
        .current
        .group_by
        .iter()
        .map(GroupKey::label)
        .collect::<Vec<_>>()
        .join(" / ");
    let ranked = comparison.ranked(headline);
    let mut lines: Vec<String> = ranked
        .iter()
        .take(def.max_rows)
        .enumerate()
        .map(|(i, row)| {
            let d = row.get(headline);
            let mut line = format!(
                "{}. **{}**: {}",
                i + 1,
                row.key_label(),
                format_metric(headline, d.current)
            );
            if headline == Metric::Ratio {
                line.push_str(&format!(
                    " ({}/{})",
                    format_count(row.get(Metric::Matching).current),
                    format_count(row.get(Metric::Count).current)
                ));
            }
            line.push_str(&delta_suffix(d, headline, history && !row.is_new));
            if history && row.is_new {
                line.push_str(" 🆕");
            }
            line
        })
        .collect();
    if ranked.len() > def.max_rows {
        lines.push(format!("... e mais {} grupos", ranked.len() - def.max_rows));
    }
    if !lines.is_empty() {
        sections.push(Section {
            heading: format!("📋 Por {}", group_label),
            lines,
        });
    }

    if !comparison.dropped.is_empty() {
        sections.push(Section {
            heading: "✅ Sem registros nesta execução".to_string(),
            lines: comparison.dropped.iter().map(|k| k.join(" / ")).collect(),
        });
    }

    if let Some(section) = def.fines.as_ref().and_then(|f| fines_section(shipments, f)) {
        sections.push(section);
    }
    if let Some(section) = def.overdue.as_ref().and_then(|o| overdue_section(shipments, o)) {
        sections.push(section);
    }

    let color = match (history, trend) {
        (true, Trend::Worsened) => HeaderColor::Red,
        (true, Trend::Improved) => HeaderColor::Green,
        _ if def.overdue.is_some() => HeaderColor::Orange,
        _ => HeaderColor::Blue,
    };

    NotificationPayload {
        title: def.title.to_string(),
        generated_at: comparison.current.generated_at,
        color,
        sections,
        link: link.map(|url| LinkButton {
            text: "Abrir relatório".to_string(),
            url: url.to_string(),
        }),
    }
}

struct FineGroup {
    key: String,
    total: f64,
    categories: Vec<(String, f64)>,
}

/// Amount totals per group, descending, each with its top categories
pub fn fines_ranking(shipments: &[Shipment], cfg: &FinesSummary) -> Vec<(String, f64, Vec<(String, f64)>)> {
    let mut groups: Vec<FineGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for s in shipments {
        let Some(amount) = s.amount else { continue };
        let key = cfg.group_by.value(s);
        let i = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(FineGroup {
                key,
                total: 0.0,
                categories: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[i];
        group.total += amount;

        let category = s.category.clone().unwrap_or_else(|| EMPTY_VALUE.to_string());
        match group.categories.iter_mut().find(|(c, _)| *c == category) {
            Some((_, sum)) => *sum += amount,
            None => group.categories.push((category, amount)),
        }
    }

    groups.sort_by(|a, b| b.total.total_cmp(&a.total));
    groups
        .into_iter()
        .take(cfg.max_groups)
        .map(|mut g| {
            g.categories.sort_by(|a, b| b.1.total_cmp(&a.1));
            g.categories.truncate(cfg.top_categories);
            (g.key, g.total, g.categories)
        })
        .collect()
}

fn fines_section(shipments: &[Shipment], cfg: &FinesSummary) -> Option<Section> {
    if !shipments.iter().any(|s| s.amount.is_some()) {
        return None;
    }
    let grand_total: f64 = shipments.iter().filter_map(|s| s.amount).sum();

    let mut lines = Vec::new();
    for (i, (key, total, categories)) in fines_ranking(shipments, cfg).into_iter().enumerate() {
        lines.push(format!("{}. **{}**: R$ {}", i + 1, key, format_brl(total)));
        for (category, amount) in categories {
            lines.push(format!("    • {}: R$ {}", category, format_brl(amount)));
        }
    }

    Some(Section {
        heading: format!(
            "💰 Multas por {} (total R$ {})",
            cfg.group_by.label(),
            format_brl(grand_total)
        ),
        lines,
    })
}

/// Groups with the most rows beyond the overdue threshold, worst first
pub fn overdue_ranking(shipments: &[Shipment], cfg: &OverdueWarning) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for s in shipments {
        if !s.days.is_some_and(|d| d > cfg.threshold_days) {
            continue;
        }
        let key = cfg.group_by.value(s);
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(cfg.top_n);
    counts
}

fn overdue_section(shipments: &[Shipment], cfg: &OverdueWarning) -> Option<Section> {
    if !shipments.iter().any(|s| s.days.is_some()) {
        return None;
    }
    let ranking = overdue_ranking(shipments, cfg);
    if ranking.is_empty() {
        return None;
    }
    Some(Section {
        heading: format!("⚠️ Mais de {} dias parados", cfg.threshold_days),
        lines: ranking
            .iter()
            .enumerate()
            .map(|(i, (key, count))| format!("{}. **{}**: {} pacotes", i + 1, key, count))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::compare::{compare, Polarity};
    use crate::reports;

    #[test]
    fn test_format_brl() {
        assert_eq!(format_brl(1234.5), "1.234,50");
        assert_eq!(format_brl(0.0), "0,00");
        assert_eq!(format_brl(999.999), "1.000,00");
        assert_eq!(format_brl(1_234_567.891), "1.234.567,89");
        assert_eq!(format_brl(-42.1), "-42,10");
        assert_eq!(format_brl(-0.001), "0,00");
    }

    #[test]
    fn test_format_pct_and_delta() {
        assert_eq!(format_pct(0.9375), "93,75%");
        assert_eq!(format_pct(0.0), "0,00%");
        assert_eq!(format_delta(Metric::Count, 3.0), "+3");
        assert_eq!(format_delta(Metric::Count, -1200.0), "-1.200");
        assert_eq!(format_delta(Metric::Ratio, 0.0125), "+1,25 p.p.");
        assert_eq!(format_delta(Metric::Sum, -10.5), "-R$ 10,50");
        assert_eq!(format_delta(Metric::Sum, 10.5), "+R$ 10,50");
        assert_eq!(format_delta(Metric::Ratio, -0.0125), "-1,25 p.p.");
    }

    fn payload_for(def: &ReportDefinition, rows: &[Shipment]) -> NotificationPayload {
        let agg = aggregate(def.name, rows, &def.group_by, &def.matcher, def.headline);
        let cmp = compare(agg, None, def.polarity);
        build_payload(def, &cmp, rows, None)
    }

    #[test]
    fn test_optional_sections_omitted_without_data() {
        let def = reports::fines();
        let rows = vec![Shipment::new("1", "SP01"), Shipment::new("2", "RJ01")];
        let payload = payload_for(&def, &rows);
        assert!(payload.section("💰").is_none());
        assert!(payload.section("⚠️").is_none());
        assert!(payload.section("📊").is_some());

        let retained = reports::retained();
        let payload = payload_for(&retained, &rows);
        assert!(payload.section("⚠️").is_none());
    }

    #[test]
    fn test_fines_summary_sorted_with_top3() {
        let rows = vec![
            Shipment::new("1", "SP01").with_amount(10.0, "Atraso"),
            Shipment::new("2", "RJ01").with_amount(100.0, "Extravio"),
            Shipment::new("3", "RJ01").with_amount(5.0, "Atraso"),
            Shipment::new("4", "RJ01").with_amount(7.0, "Avaria"),
            Shipment::new("5", "RJ01").with_amount(1.0, "Endereço"),
        ];
        let def = reports::fines();
        let cfg = def.fines.as_ref().unwrap();
        let ranking = fines_ranking(&rows, cfg);
        assert_eq!(ranking[0].0, "RJ01");
        assert_eq!(ranking[0].1, 113.0);
        let cats: Vec<&str> = ranking[0].2.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(cats, vec!["Extravio", "Avaria", "Atraso"]);
        assert_eq!(ranking[1].0, "SP01");

        let payload = payload_for(&def, &rows);
        let section = payload.section("💰").unwrap();
        assert!(section.heading.contains("R$ 123,00"));
        assert_eq!(section.lines[0], "1. **RJ01**: R$ 113,00");
    }

    #[test]
    fn test_card_shape() {
        let def = reports::retained();
        let rows = vec![Shipment::new("1", "SP01").with_days(20.0)];
        let agg = aggregate(def.name, &rows, &def.group_by, &def.matcher, def.headline);
        let cmp = compare(agg, None, Polarity::LowerIsBetter);
        let payload = build_payload(&def, &cmp, &rows, Some("https://relatorios.local/retidos"));
        let card = payload.to_card();

        assert_eq!(card["msg_type"], "interactive");
        assert_eq!(card["card"]["header"]["title"]["content"], def.title);
        let elements = card["card"]["elements"].as_array().unwrap();
        let last = elements.last().unwrap();
        assert_eq!(last["tag"], "action");
        assert_eq!(last["actions"][0]["url"], "https://relatorios.local/retidos");
        assert!(payload.to_text().contains("Sem histórico anterior"));
    }
}
