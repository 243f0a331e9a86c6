//! Formatted text: insight statements, terminal summaries and chat messages.
//!
//! We keep formatting code in one place so:
//! - the detection/forecast code stays clean and testable
//! - output changes are localized

use crate::domain::{
    AccuracySummary, ComparisonWindow, DecompositionResult, Direction, InsightReport, Language,
};
use crate::detect::DetectionOutcome;

/// One period-over-period sentence.
pub fn comparison_text(
    direction: Direction,
    percent: f64,
    delta: f64,
    window: ComparisonWindow,
    language: Language,
) -> String {
    let delta = fmt_count(delta);
    match language {
        Language::En => {
            let against = match window {
                ComparisonWindow::Day => "yesterday",
                ComparisonWindow::Week => "last week",
                ComparisonWindow::Month => "last month",
            };
            match direction {
                Direction::Increase => {
                    format!("Increase {percent:.2}% compared to {against}. (+{delta} merchants)")
                }
                Direction::Decrease => {
                    format!("Decrease {percent:.2}% compared to {against}. (-{delta} merchants)")
                }
                Direction::NoChange => format!("No change compared to {against}."),
            }
        }
        Language::Vi => {
            let against = match window {
                ComparisonWindow::Day => "ngày hôm qua",
                ComparisonWindow::Week => "tuần trước",
                ComparisonWindow::Month => "tháng trước",
            };
            match direction {
                Direction::Increase => {
                    format!("Tăng {percent:.2}% so với {against}. (+ {delta} khách)")
                }
                Direction::Decrease => {
                    format!("Giảm {percent:.2}% so với {against}. (- {delta} khách)")
                }
                Direction::NoChange => format!("Hôm nay không thay đổi so với {against}."),
            }
        }
    }
}

/// Counts print without decimals when integral.
pub fn fmt_count(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

/// Terminal block for one insight report.
pub fn format_insight(report: &InsightReport, language: Language) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== {} | {} | {} ===\n",
        report.product,
        report.metric_kind.display_name(language),
        report.report_date
    ));
    out.push_str(&format!("Current count : {}\n", fmt_count(report.current_count)));
    out.push_str(&format!("Day-over-day  : {}\n", report.day_over_day_text));
    out.push_str(&format!("Week-over-week: {}\n", report.week_over_week_text));
    out.push_str(&format!("Month-over-month: {}\n", report.month_over_month_text));
    out.push_str(&format!("Anomaly rate  : {}\n", report.anomaly_rate));
    if let Some(r) = &report.forecast_artifact_ref {
        out.push_str(&format!("Forecast chart: {r}\n"));
    }
    if let Some(r) = &report.anomaly_artifact_ref {
        out.push_str(&format!("Anomaly chart : {r}\n"));
    }
    out
}

/// Detection summary plus a table of flagged days.
pub fn format_detection(label: &str, outcome: &DetectionOutcome, max_rows: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{label}: mode={} points={} anomalies={}",
        outcome.mode.label(),
        outcome.rows.len(),
        outcome.anomaly_count()
    ));
    if let Some(band) = &outcome.band {
        out.push_str(&format!(" band=[{:.3}, {:.3}]", band.lower, band.upper));
    }
    if outcome.degenerate_variance {
        out.push_str(" (near-zero variance)");
    }
    out.push('\n');

    let flagged: Vec<&DecompositionResult> = outcome.anomalies().collect();
    if flagged.is_empty() {
        return out;
    }
    let header = format!("{:<12} {:>12} {:>12} {:>12}", "date", "value", "trend", "residual");
    out.push_str(header.trim_end());
    out.push('\n');
    out.push_str(format!("{:-<12} {:-<12} {:-<12} {:-<12}", "", "", "", "").trim_end());
    out.push('\n');
    for r in flagged.iter().rev().take(max_rows) {
        out.push_str(&format!(
            "{:<12} {:>12.2} {:>12.2} {:>12.2}\n",
            r.date.to_string(),
            r.value,
            r.trend,
            r.residual
        ));
    }
    out
}

/// One-line accuracy summary.
pub fn format_accuracy(label: &str, summary: &AccuracySummary) -> String {
    format!(
        "{label}: MAE={:.3} RMSE={:.3} MAPE={:.2}% observed={} forecast={}\n",
        summary.mae,
        summary.rmse,
        summary.mape,
        summary.observed_point_count,
        summary.forecast_point_count
    )
}

/// Plain-text chat body for a batch of reports.
///
/// `link` resolves an artifact reference into something clickable.
pub fn format_chat_text<F>(reports: &[InsightReport], language: Language, link: F) -> String
where
    F: Fn(&str) -> String,
{
    let (headline, forecast_label, anomaly_label) = match language {
        Language::En => ("Daily merchant report", "View forecast", "View anomalies"),
        Language::Vi => ("Báo cáo khách hàng hằng ngày", "Xem dự báo", "Xem bất thường"),
    };

    let mut parts = Vec::new();
    for r in reports {
        let mut lines = vec![
            format!(
                "📊 *{headline}: {} {}* ({})",
                r.product,
                r.metric_kind.display_name(language),
                r.report_date.format("%d/%m/%Y")
            ),
            format!("🔹 {}", fmt_count(r.current_count)),
            format!("• {}", r.day_over_day_text),
            format!("• {}", r.week_over_week_text),
            format!("• {}", r.month_over_month_text),
            format!("🚨 {}", r.anomaly_rate),
        ];
        if let Some(f) = &r.forecast_artifact_ref {
            lines.push(format!("🔗 <{}|{forecast_label}>", link(f)));
        }
        if let Some(a) = &r.anomaly_artifact_ref {
            lines.push(format!("🔗 <{}|{anomaly_label}>", link(a)));
        }
        parts.push(lines.join("\n"));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetricKind;
    use chrono::NaiveDate;

    #[test]
    fn integral_counts_have_no_decimals() {
        assert_eq!(fmt_count(20.0), "20");
        assert_eq!(fmt_count(227079.0), "227079");
        assert_eq!(fmt_count(2.5), "2.50");
    }

    #[test]
    fn vietnamese_neutral_statement() {
        let t =
            comparison_text(Direction::NoChange, 0.0, 0.0, ComparisonWindow::Week, Language::Vi);
        assert_eq!(t, "Hôm nay không thay đổi so với tuần trước.");
        let t =
            comparison_text(Direction::Decrease, 12.5, 4.0, ComparisonWindow::Month, Language::Vi);
        assert_eq!(t, "Giảm 12.50% so với tháng trước. (- 4 khách)");
    }

    #[test]
    fn chat_text_links_artifacts() {
        let report = InsightReport {
            product: "Retail".to_string(),
            metric_kind: MetricKind::ActiveMerchant,
            report_date: NaiveDate::from_ymd_opt(2025, 6, 23).unwrap(),
            current_count: 227079.0,
            day_over_day_text: "a".to_string(),
            week_over_week_text: "b".to_string(),
            month_over_month_text: "c".to_string(),
            anomaly_rate_percent: 0.0,
            anomaly_rate: "No anomalies".to_string(),
            forecast_artifact_ref: Some("docs/f.svg".to_string()),
            anomaly_artifact_ref: None,
        };
        let text = format_chat_text(&[report], Language::En, |r| format!("https://x/{r}"));
        assert!(text.contains("Retail Active merchants"));
        assert!(text.contains("(23/06/2025)"));
        assert!(text.contains("<https://x/docs/f.svg|View forecast>"));
        assert!(!text.contains("View anomalies"));
    }
}
