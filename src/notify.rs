//! Feishu webhook delivery
//!
//! Payloads are posted as JSON. When a target carries a secret, `timestamp`
//! and `sign` are added at the top level of the body. A failed delivery is
//! reported to the caller and never retried.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{ReportError, Result};
use crate::format::NotificationPayload;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookTarget {
    pub name: String,
    pub url: String,
    pub secret: Option<String>,
}

const PLACEHOLDER_MARKERS: &[&str] = &["xxx", "your-", "your_", "<", ">", "{", "}", "example.com", "changeme"];

/// Reject malformed or placeholder URLs before any network I/O
pub fn validate_url(url: &str) -> Result<Url> {
    let invalid = |reason: &str| ReportError::InvalidWebhook {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    let lowered = trimmed.to_ascii_lowercase();
    if let Some(marker) = PLACEHOLDER_MARKERS.iter().find(|m| lowered.contains(*m)) {
        return Err(invalid(&format!("looks like a placeholder ('{}')", marker)));
    }

    let parsed = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    if parsed.path().trim_end_matches('/').ends_with("/hook") {
        return Err(invalid("missing hook token"));
    }
    Ok(parsed)
}

/// Feishu signature: HMAC-SHA256 keyed with `"{timestamp}\n{secret}"` over
/// an empty message, base64 encoded
pub fn sign(timestamp: i64, secret: &str) -> Result<String> {
    let string_to_sign = format!("{}\n{}", timestamp, secret);
    let mac = HmacSha256::new_from_slice(string_to_sign.as_bytes())
        .map_err(|e| ReportError::Config(format!("invalid signing key: {}", e)))?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Attach `timestamp`/`sign` to a card body
pub fn signed_body(mut body: Value, secret: Option<&str>, timestamp: i64) -> Result<Value> {
    if let (Some(secret), Some(obj)) = (secret.filter(|s| !s.is_empty()), body.as_object_mut()) {
        obj.insert("timestamp".into(), Value::String(timestamp.to_string()));
        obj.insert("sign".into(), Value::String(sign(timestamp, secret)?));
    }
    Ok(body)
}

/// Success needs a 2xx and, when present, a zero `code`/`StatusCode` in the body
pub fn check_response(status: StatusCode, body: &Value) -> std::result::Result<(), String> {
    if !status.is_success() {
        return Err(format!("HTTP {}: {}", status, body));
    }
    let code = body
        .get("code")
        .or_else(|| body.get("StatusCode"))
        .and_then(Value::as_i64);
    match code {
        Some(0) | None => Ok(()),
        Some(code) => {
            let msg = body
                .get("msg")
                .or_else(|| body.get("StatusMessage"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(format!("code {}: {}", code, msg))
        }
    }
}

#[derive(Debug)]
pub struct SendOutcome {
    pub target: String,
    pub result: Result<()>,
}

impl SendOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Notifier {
    client: reqwest::Client,
    send_delay: Duration,
}

impl Notifier {
    pub fn new(timeout: Duration, send_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, send_delay })
    }

    pub async fn send(&self, target: &WebhookTarget, payload: &NotificationPayload) -> Result<()> {
        let url = validate_url(&target.url)?;
        let body = signed_body(
            payload.to_card(),
            target.secret.as_deref(),
            Utc::now().timestamp(),
        )?;

        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let reply: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        check_response(status, &reply).map_err(|reason| ReportError::Webhook {
            target: target.name.clone(),
            reason,
        })?;

        info!("Sent '{}' to webhook '{}'", payload.title, target.name);
        Ok(())
    }

    /// Deliver to every target in order, pausing between sends. A failure is
    /// logged and does not stop the remaining targets.
    pub async fn send_all(&self, targets: &[WebhookTarget], payload: &NotificationPayload) -> Vec<SendOutcome> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            if i > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            let result = self.send(target, payload).await;
            match &result {
                Err(e @ ReportError::InvalidWebhook { .. }) => warn!("Skipping webhook '{}': {}", target.name, e),
                Err(e) => error!("Webhook '{}' failed: {}", target.name, e),
                Ok(()) => {}
            }
            outcomes.push(SendOutcome {
                target: target.name.clone(),
                result,
            });
        }
        outcomes
    }
}
