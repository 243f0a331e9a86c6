//! Report assembly: period comparisons and the per-pair `InsightReport`.
//!
//! The assembler reads raw per-date counts, never the detector or forecaster
//! tables, so the statements stay meaningful even when a model misbehaves.

pub mod format;

use chrono::{Duration, NaiveDate};

use crate::domain::{
    ComparisonWindow, Direction, InsightReport, Language, MetricKind, PeriodComparison, Series,
};

pub use format::*;

/// Count recorded on `date`; imputed or missing dates count as `0`.
pub fn count_on(series: &Series, date: NaiveDate) -> f64 {
    series.observed_on(date).unwrap_or(0.0)
}

/// Compare `current` against the value `window.days_back()` days earlier.
pub fn compare(
    current: f64,
    previous: f64,
    window: ComparisonWindow,
    language: Language,
) -> PeriodComparison {
    let direction = if current > previous {
        Direction::Increase
    } else if current < previous {
        Direction::Decrease
    } else {
        Direction::NoChange
    };
    let delta = (current - previous).abs();
    let percent = if previous != 0.0 { delta / previous * 100.0 } else { 0.0 };

    PeriodComparison {
        window,
        current,
        previous,
        delta,
        percent,
        direction,
        text: comparison_text(direction, percent, delta, window, language),
    }
}

/// Comparisons for today versus 1, 7 and 30 days back.
pub fn compare_all(series: &Series, today: NaiveDate, language: Language) -> Vec<PeriodComparison> {
    let current = count_on(series, today);
    ComparisonWindow::ALL
        .iter()
        .map(|&w| {
            let previous = count_on(series, today - Duration::days(w.days_back()));
            compare(current, previous, w, language)
        })
        .collect()
}

/// `"x.xx%"`, or the "no anomalies" sentinel when the rate is exactly zero.
pub fn anomaly_rate_text(rate_percent: f64, language: Language) -> String {
    if rate_percent > 0.0 {
        format!("{rate_percent:.2}%")
    } else {
        match language {
            Language::En => "No anomalies".to_string(),
            Language::Vi => "Không có bất thường".to_string(),
        }
    }
}

/// Inputs of `assemble_insight` that aren't derived from the series.
#[derive(Debug, Clone)]
pub struct InsightContext {
    pub product: String,
    pub metric_kind: MetricKind,
    pub today: NaiveDate,
    pub language: Language,
    pub anomaly_rate_percent: f64,
    pub forecast_artifact_ref: Option<String>,
    pub anomaly_artifact_ref: Option<String>,
}

/// Build the report record for one (product, metric) pair.
pub fn assemble_insight(series: &Series, ctx: InsightContext) -> InsightReport {
    let comparisons = compare_all(series, ctx.today, ctx.language);
    let text = |w: ComparisonWindow| {
        comparisons
            .iter()
            .find(|c| c.window == w)
            .map(|c| c.text.clone())
            .unwrap_or_default()
    };

    InsightReport {
        product: ctx.product,
        metric_kind: ctx.metric_kind,
        report_date: ctx.today,
        current_count: count_on(series, ctx.today),
        day_over_day_text: text(ComparisonWindow::Day),
        week_over_week_text: text(ComparisonWindow::Week),
        month_over_month_text: text(ComparisonWindow::Month),
        anomaly_rate_percent: ctx.anomaly_rate_percent,
        anomaly_rate: anomaly_rate_text(ctx.anomaly_rate_percent, ctx.language),
        forecast_artifact_ref: ctx.forecast_artifact_ref,
        anomaly_artifact_ref: ctx.anomaly_artifact_ref,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeSeriesPoint;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn point(date: NaiveDate, value: f64) -> TimeSeriesPoint {
        TimeSeriesPoint { date, value, imputed: false }
    }

    fn sample() -> Series {
        Series {
            product: Some("Retail".to_string()),
            metric: "new_merchant".to_string(),
            points: vec![
                point(d(2025, 5, 24), 120.0),
                point(d(2025, 6, 16), 150.0),
                point(d(2025, 6, 22), 100.0),
                point(d(2025, 6, 23), 120.0),
            ],
        }
    }

    #[test]
    fn day_over_day_increase() {
        let c = compare(120.0, 100.0, ComparisonWindow::Day, Language::En);
        assert_eq!(c.direction, Direction::Increase);
        assert_eq!(c.delta, 20.0);
        assert!((c.percent - 20.0).abs() < 1e-12);
        assert_eq!(c.text, "Increase 20.00% compared to yesterday. (+20 merchants)");

        let vi = compare(120.0, 100.0, ComparisonWindow::Day, Language::Vi);
        assert_eq!(vi.text, "Tăng 20.00% so với ngày hôm qua. (+ 20 khách)");
    }

    #[test]
    fn decrease_equal_and_zero_baseline() {
        let c = compare(120.0, 150.0, ComparisonWindow::Week, Language::En);
        assert_eq!(c.direction, Direction::Decrease);
        assert_eq!(c.text, "Decrease 20.00% compared to last week. (-30 merchants)");

        let c = compare(120.0, 120.0, ComparisonWindow::Month, Language::En);
        assert_eq!(c.direction, Direction::NoChange);
        assert_eq!(c.text, "No change compared to last month.");

        let c = compare(5.0, 0.0, ComparisonWindow::Day, Language::En);
        assert_eq!(c.percent, 0.0);
        assert_eq!(c.text, "Increase 0.00% compared to yesterday. (+5 merchants)");
    }

    #[test]
    fn lookups_use_exact_offsets() {
        let comps = compare_all(&sample(), d(2025, 6, 23), Language::En);
        assert_eq!(comps.len(), 3);
        assert_eq!(comps[0].previous, 100.0);
        assert_eq!(comps[1].previous, 150.0);
        assert_eq!(comps[2].previous, 120.0);
        assert_eq!(comps[2].direction, Direction::NoChange);

        // Nothing recorded 30 days before 2025-06-22.
        let comps = compare_all(&sample(), d(2025, 6, 22), Language::En);
        assert_eq!(comps[2].previous, 0.0);
    }

    #[test]
    fn anomaly_rate_sentinel() {
        assert_eq!(anomaly_rate_text(0.0, Language::En), "No anomalies");
        assert_eq!(anomaly_rate_text(0.0, Language::Vi), "Không có bất thường");
        assert_eq!(anomaly_rate_text(3.2967, Language::En), "3.30%");
    }

    #[test]
    fn assembles_the_report_record() {
        let report = assemble_insight(
            &sample(),
            InsightContext {
                product: "Retail".to_string(),
                metric_kind: MetricKind::NewMerchant,
                today: d(2025, 6, 23),
                language: Language::En,
                anomaly_rate_percent: 0.0,
                forecast_artifact_ref: Some("docs/forecast_retail_new_20250623.svg".to_string()),
                anomaly_artifact_ref: None,
            },
        );
        assert_eq!(report.current_count, 120.0);
        assert_eq!(
            report.day_over_day_text,
            "Increase 20.00% compared to yesterday. (+20 merchants)"
        );
        assert_eq!(report.anomaly_rate, "No anomalies");
        assert!(report.anomaly_artifact_ref.is_none());
    }
}
