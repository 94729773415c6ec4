//! Runtime configuration
//!
//! Built once at startup from hard-coded defaults overridden by environment
//! variables, then passed by reference to every stage.
//!
//! Environment variables:
//!   REPORTS_INPUT_DIR              - directory scanned for exports (default: data/input)
//!   REPORTS_REFERENCE_FILE         - coordinator workbook (default: data/reference/Coordenadores.xlsx)
//!   REPORTS_REFERENCE_SHEET        - sheet of the coordinator workbook (default: first)
//!   REPORTS_ARCHIVE_DIR            - previous-run archive (default: data/archive)
//!   REPORTS_OUTPUT_DIR             - derived workbooks (default: data/output)
//!   REPORTS_RETENTION_DAYS         - archive retention (default: 7)
//!   REPORTS_WEBHOOK_URL / _SECRET  - default webhook target
//!   REPORTS_WEBHOOK_<NAME>_URL / _SECRET - per-report target override
//!   REPORTS_WEBHOOK_TIMEOUT_SECS   - per-request timeout (default: 10)
//!   REPORTS_SEND_DELAY_MS          - pause between webhook sends (default: 1000)
//!   REPORTS_LINK_URL               - optional button link on every card

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ReportError, Result};
use crate::notify::WebhookTarget;

const PREFIX: &str = "REPORTS_";
const WEBHOOK_PREFIX: &str = "REPORTS_WEBHOOK_";

#[derive(Debug, Clone)]
pub struct Config {
    pub input_dir: PathBuf,
    pub reference_file: PathBuf,
    pub reference_sheet: Option<String>,
    pub archive_dir: PathBuf,
    pub output_dir: PathBuf,
    pub retention: Duration,
    pub default_webhook: Option<WebhookTarget>,
    /// Keyed by lowercase target name
    pub webhooks: HashMap<String, WebhookTarget>,
    pub webhook_timeout: Duration,
    pub send_delay: Duration,
    pub link_url: Option<String>,
    /// Reference date for day counts derived from event times (default: today)
    pub as_of: Option<NaiveDate>,
    /// Format and log cards without sending them
    pub dry_run: bool,
    /// Write the `Dados_Completos`/`ResumoNumerico` workbook on every cycle
    pub export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/input"),
            reference_file: PathBuf::from("data/reference/Coordenadores.xlsx"),
            reference_sheet: None,
            archive_dir: PathBuf::from("data/archive"),
            output_dir: PathBuf::from("data/output"),
            retention: Duration::from_secs(7 * 86_400),
            default_webhook: None,
            webhooks: HashMap::new(),
            webhook_timeout: Duration::from_secs(10),
            send_delay: Duration::from_millis(1000),
            link_url: None,
            as_of: None,
            dry_run: false,
            export: false,
        }
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ReportError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from an explicit variable list; unrelated variables are ignored
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, v)| k.starts_with(PREFIX) && !v.trim().is_empty())
            .collect();
        let get = |name: &str| vars.get(&format!("{}{}", PREFIX, name)).map(|v| v.trim().to_string());

        let mut config = Config::default();
        if let Some(v) = get("INPUT_DIR") {
            config.input_dir = v.into();
        }
        if let Some(v) = get("REFERENCE_FILE") {
            config.reference_file = v.into();
        }
        config.reference_sheet = get("REFERENCE_SHEET");
        if let Some(v) = get("ARCHIVE_DIR") {
            config.archive_dir = v.into();
        }
        if let Some(v) = get("OUTPUT_DIR") {
            config.output_dir = v.into();
        }
        if let Some(v) = get("RETENTION_DAYS") {
            let days = parse_u64("REPORTS_RETENTION_DAYS", &v)?;
            if days == 0 {
                return Err(ReportError::Config("REPORTS_RETENTION_DAYS must be at least 1".into()));
            }
            config.retention = Duration::from_secs(days * 86_400);
        }
        if let Some(v) = get("WEBHOOK_TIMEOUT_SECS") {
            config.webhook_timeout = Duration::from_secs(parse_u64("REPORTS_WEBHOOK_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("SEND_DELAY_MS") {
            config.send_delay = Duration::from_millis(parse_u64("REPORTS_SEND_DELAY_MS", &v)?);
        }
        config.link_url = get("LINK_URL");

        config.default_webhook = get("WEBHOOK_URL").map(|url| WebhookTarget {
            name: "default".to_string(),
            url,
            secret: get("WEBHOOK_SECRET"),
        });

        for (key, url) in &vars {
            let Some(name) = key
                .strip_prefix(WEBHOOK_PREFIX)
                .and_then(|rest| rest.strip_suffix("_URL"))
                .filter(|n| !n.is_empty())
            else {
                continue;
            };
            let secret = vars
                .get(&format!("{}{}_SECRET", WEBHOOK_PREFIX, name))
                .map(|s| s.trim().to_string());
            let name = name.to_ascii_lowercase();
            config.webhooks.insert(
                name.clone(),
                WebhookTarget {
                    name,
                    url: url.trim().to_string(),
                    secret,
                },
            );
        }

        Ok(config)
    }

    /// Targets for a report's webhook names; names without their own entry
    /// fall back to the default webhook, which is used at most once.
    pub fn targets_for(&self, names: &[&str]) -> Vec<WebhookTarget> {
        let mut targets = Vec::new();
        let mut used_default = false;
        for name in names {
            match self.webhooks.get(&name.to_ascii_lowercase()) {
                Some(t) => targets.push(t.clone()),
                None if !used_default => {
                    if let Some(d) = &self.default_webhook {
                        targets.push(d.clone());
                        used_default = true;
                    }
                }
                None => {}
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let c = Config::from_vars(vars(&[("HOME", "/root")])).unwrap();
        assert_eq!(c.input_dir, PathBuf::from("data/input"));
        assert_eq!(c.retention, Duration::from_secs(7 * 86_400));
        assert!(c.default_webhook.is_none());
        assert!(c.targets_for(&["retidos"]).is_empty());
    }

    #[test]
    fn test_overrides_and_targets() {
        let c = Config::from_vars(vars(&[
            ("REPORTS_INPUT_DIR", "/srv/exports"),
            ("REPORTS_RETENTION_DAYS", "3"),
            ("REPORTS_WEBHOOK_URL", "https://open.feishu.cn/open-apis/bot/v2/hook/default"),
            ("REPORTS_WEBHOOK_SLA_URL", "https://open.feishu.cn/open-apis/bot/v2/hook/sla"),
            ("REPORTS_WEBHOOK_SLA_SECRET", "s3"),
            ("REPORTS_LINK_URL", "  "),
        ]))
        .unwrap();

        assert_eq!(c.input_dir, PathBuf::from("/srv/exports"));
        assert_eq!(c.retention, Duration::from_secs(3 * 86_400));
        assert!(c.link_url.is_none());

        let sla = c.targets_for(&["sla"]);
        assert_eq!(sla.len(), 1);
        assert_eq!(sla[0].name, "sla");
        assert_eq!(sla[0].secret.as_deref(), Some("s3"));

        let retidos = c.targets_for(&["retidos", "extra"]);
        assert_eq!(retidos.len(), 1);
        assert_eq!(retidos[0].name, "default");
    }

    #[test]
    fn test_bad_numbers_fail() {
        assert!(Config::from_vars(vars(&[("REPORTS_RETENTION_DAYS", "uma semana")])).is_err());
        assert!(Config::from_vars(vars(&[("REPORTS_RETENTION_DAYS", "0")])).is_err());
        assert!(Config::from_vars(vars(&[("REPORTS_SEND_DELAY_MS", "-5")])).is_err());
    }
}
