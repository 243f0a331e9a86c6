//! Chat webhook delivery of insight reports.
//!
//! One POST per batch: a plain `text` body (for clients that ignore cards)
//! plus a `cardsV2` card with one section per report.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::{InsightReport, Language};
use crate::error::{EngineError, Result};
use crate::report::{fmt_count, format_chat_text};

pub const WEBHOOK_ENV: &str = "GOOGLE_CHAT_WEBHOOK_URL";
pub const ARTIFACT_BASE_ENV: &str = "PULSE_ARTIFACT_BASE_URL";

const TIMEOUT: Duration = Duration::from_secs(30);

pub struct ChatClient {
    client: Client,
    webhook_url: String,
    artifact_base: Option<String>,
}

impl ChatClient {
    pub fn new(webhook_url: impl Into<String>, artifact_base: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| EngineError::Delivery(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            artifact_base,
        })
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let webhook_url = std::env::var(WEBHOOK_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                EngineError::InvalidConfig(format!("missing {WEBHOOK_ENV} in environment (.env)"))
            })?;
        let artifact_base = std::env::var(ARTIFACT_BASE_ENV).ok().filter(|v| !v.trim().is_empty());
        Self::new(webhook_url, artifact_base)
    }

    pub fn send(&self, reports: &[InsightReport], language: Language) -> Result<()> {
        if reports.is_empty() {
            info!("no reports to deliver");
            return Ok(());
        }
        let payload = build_payload(reports, language, self.artifact_base.as_deref());
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .map_err(|e| EngineError::Delivery(format!("webhook request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(EngineError::Delivery(format!(
                "webhook returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        info!(reports = reports.len(), %status, "delivered chat message");
        Ok(())
    }
}

/// Resolve an artifact reference against the public base URL, if any.
pub fn artifact_url(base: Option<&str>, reference: &str) -> String {
    match base {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            reference.trim_start_matches("./").trim_start_matches('/')
        ),
        None => reference.to_string(),
    }
}

/// Webhook JSON body for a batch of reports.
pub fn build_payload(
    reports: &[InsightReport],
    language: Language,
    artifact_base: Option<&str>,
) -> Value {
    let text = format_chat_text(reports, language, |r| artifact_url(artifact_base, r));

    let (title, forecast_label, anomaly_label, rate_label) = match language {
        Language::En => (
            "Daily merchant report",
            "View forecast",
            "View anomalies",
            "Anomaly rate",
        ),
        Language::Vi => (
            "Báo cáo khách hàng hằng ngày",
            "Xem dự báo",
            "Xem bất thường",
            "Tỷ lệ bất thường",
        ),
    };
    let subtitle = reports
        .first()
        .map(|r| r.report_date.format("%d/%m/%Y").to_string())
        .unwrap_or_default();

    let sections: Vec<Value> = reports
        .iter()
        .map(|r| {
            let mut widgets = vec![
                json!({ "decoratedText": {
                    "topLabel": r.metric_kind.display_name(language),
                    "text": format!("<b>{}</b>", fmt_count(r.current_count)),
                }}),
                json!({ "textParagraph": { "text": format!(
                    "{}<br>{}<br>{}",
                    r.day_over_day_text, r.week_over_week_text, r.month_over_month_text
                )}}),
                json!({ "decoratedText": { "topLabel": rate_label, "text": r.anomaly_rate }}),
            ];

            let mut buttons = Vec::new();
            if let Some(f) = &r.forecast_artifact_ref {
                buttons.push(link_button(forecast_label, &artifact_url(artifact_base, f)));
            }
            if let Some(a) = &r.anomaly_artifact_ref {
                buttons.push(link_button(anomaly_label, &artifact_url(artifact_base, a)));
            }
            if !buttons.is_empty() {
                widgets.push(json!({ "buttonList": { "buttons": buttons } }));
            }

            json!({
                "header": format!("{} · {}", r.product, r.metric_kind.display_name(language)),
                "widgets": widgets,
            })
        })
        .collect();

    json!({
        "text": text,
        "cardsV2": [{
            "cardId": "merchant-report",
            "card": {
                "header": { "title": title, "subtitle": subtitle },
                "sections": sections,
            }
        }]
    })
}

fn link_button(label: &str, url: &str) -> Value {
    json!({ "text": label, "onClick": { "openLink": { "url": url } } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetricKind;
    use chrono::NaiveDate;

    fn report(anomaly_ref: Option<&str>) -> InsightReport {
        InsightReport {
            product: "Retail".to_string(),
            metric_kind: MetricKind::NewMerchant,
            report_date: NaiveDate::from_ymd_opt(2025, 6, 23).unwrap(),
            current_count: 120.0,
            day_over_day_text: "Increase 20.00% compared to yesterday. (+20 merchants)".to_string(),
            week_over_week_text: "Decrease 20.00% compared to last week. (-30 merchants)"
                .to_string(),
            month_over_month_text: "No change compared to last month.".to_string(),
            anomaly_rate_percent: 2.2,
            anomaly_rate: "2.20%".to_string(),
            forecast_artifact_ref: Some("docs/forecast_retail_new_20250623.svg".to_string()),
            anomaly_artifact_ref: anomaly_ref.map(str::to_string),
        }
    }

    #[test]
    fn artifact_urls_join_cleanly() {
        assert_eq!(
            artifact_url(Some("https://x.io/site/"), "docs/a.svg"),
            "https://x.io/site/docs/a.svg"
        );
        assert_eq!(artifact_url(Some("https://x.io"), "./docs/a.svg"), "https://x.io/docs/a.svg");
        assert_eq!(artifact_url(None, "docs/a.svg"), "docs/a.svg");
    }

    #[test]
    fn payload_has_text_and_one_section_per_report() {
        let reports = vec![report(None), report(Some("docs/anomalies.svg"))];
        let payload = build_payload(&reports, Language::En, Some("https://x.io"));

        let text = payload["text"].as_str().unwrap();
        assert!(text.contains("Increase 20.00% compared to yesterday."));
        assert!(text.contains("<https://x.io/docs/anomalies.svg|View anomalies>"));

        let card = &payload["cardsV2"][0]["card"];
        assert_eq!(card["header"]["subtitle"], "23/06/2025");
        let sections = card["sections"].as_array().unwrap();
        assert_eq!(sections.len(), 2);

        let buttons = |i: usize| {
            sections[i]["widgets"]
                .as_array()
                .unwrap()
                .iter()
                .find_map(|w| w["buttonList"]["buttons"].as_array().cloned())
                .unwrap()
        };
        assert_eq!(buttons(0).len(), 1);
        assert_eq!(buttons(1).len(), 2);
        assert_eq!(
            buttons(0)[0]["onClick"]["openLink"]["url"],
            "https://x.io/docs/forecast_retail_new_20250623.svg"
        );
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let client = ChatClient::new("http://127.0.0.1:9/unused", None).unwrap();
        assert!(client.send(&[], Language::En).is_ok());
    }
}
