//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the loader, detector, forecaster and report assembler
//! - exported to CSV/JSON
//! - read back for charting, delivery or comparisons

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which merchant-class metric a run looks at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[value(name = "new_merchant")]
    NewMerchant,
    #[value(name = "active_merchant")]
    ActiveMerchant,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::NewMerchant, MetricKind::ActiveMerchant];

    /// Column name in the source table.
    pub fn column(self) -> &'static str {
        match self {
            MetricKind::NewMerchant => "new_merchant",
            MetricKind::ActiveMerchant => "active_merchant",
        }
    }

    /// Short token used when decorating artifact file names.
    pub fn token(self) -> &'static str {
        metric_token(self.column())
    }

    pub fn display_name(self, language: Language) -> &'static str {
        match (self, language) {
            (MetricKind::NewMerchant, Language::En) => "New merchants",
            (MetricKind::ActiveMerchant, Language::En) => "Active merchants",
            (MetricKind::NewMerchant, Language::Vi) => "Khách hàng mới",
            (MetricKind::ActiveMerchant, Language::Vi) => "Khách hàng đang hoạt động",
        }
    }
}

/// Lower-cased text before the first `_` of a metric name (`active_merchant` -> `active`).
pub fn metric_token(metric: &str) -> &str {
    let metric = metric.trim();
    metric.split('_').next().filter(|s| !s.is_empty()).unwrap_or(metric)
}

/// Chart flavour used by the chart renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    /// Bars for new-merchant counts, lines otherwise.
    Auto,
    Line,
    Bar,
}

impl ChartType {
    pub fn resolve(self, metric: MetricKind) -> ChartType {
        match self {
            ChartType::Auto => match metric {
                MetricKind::NewMerchant => ChartType::Bar,
                MetricKind::ActiveMerchant => ChartType::Line,
            },
            other => other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChartType::Auto => "auto",
            ChartType::Line => "line",
            ChartType::Bar => "bar",
        }
    }
}

/// Language of the insight statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Vi,
}

/// One day of a clean univariate series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
    /// The raw value was null and has been forward/backward filled.
    #[serde(default)]
    pub imputed: bool,
}

/// A date-sorted, one-value-per-date series scoped to one (product, metric) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub product: Option<String>,
    pub metric: String,
    pub points: Vec<TimeSeriesPoint>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Value recorded for `date` before any filling (imputed points count as missing).
    pub fn observed_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|idx| self.points[idx])
            .filter(|p| !p.imputed)
            .map(|p| p.value)
    }

    /// Restrict to an inclusive date range.
    pub fn between(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Series {
        let points = self
            .points
            .iter()
            .filter(|p| start.is_none_or(|s| p.date >= s) && end.is_none_or(|e| p.date <= e))
            .copied()
            .collect();
        Series {
            product: self.product.clone(),
            metric: self.metric.clone(),
            points,
        }
    }
}

/// Per-date output of the anomaly detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub date: NaiveDate,
    /// Observed (filled) value.
    pub value: f64,
    pub trend: f64,
    pub seasonal: f64,
    pub residual: f64,
    #[serde(with = "int_flag")]
    pub anomaly: bool,
    /// Residual band; only present in decomposition mode.
    pub threshold_upper: Option<f64>,
    pub threshold_lower: Option<f64>,
}

/// Per-date output of the forecaster (history plus horizon).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
    pub trend: f64,
    pub yearly: f64,
    pub weekly: f64,
    pub monthly: f64,
    pub quarterly: f64,
    pub semi_annual: f64,
    pub holidays: f64,
    /// Value observed before filling; `None` for future or originally-missing dates.
    pub observed: Option<f64>,
    pub is_forecast: bool,
    pub confidence_width: f64,
    pub residual: Option<f64>,
    pub abs_error: Option<f64>,
    pub pct_error: Option<f64>,
}

/// Historical accuracy over rows with an observed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracySummary {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub observed_point_count: usize,
    pub forecast_point_count: usize,
}

/// Comparison window for the period-over-period insights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonWindow {
    Day,
    Week,
    Month,
}

impl ComparisonWindow {
    pub const ALL: [ComparisonWindow; 3] = [
        ComparisonWindow::Day,
        ComparisonWindow::Week,
        ComparisonWindow::Month,
    ];

    /// Offset (days back from "today") of the comparison value.
    pub fn days_back(self) -> i64 {
        match self {
            ComparisonWindow::Day => 1,
            ComparisonWindow::Week => 7,
            ComparisonWindow::Month => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
    NoChange,
}

/// One period-over-period statement with its numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodComparison {
    pub window: ComparisonWindow,
    pub current: f64,
    pub previous: f64,
    /// Absolute difference (always non-negative).
    pub delta: f64,
    /// Percentage change relative to `previous` (0 when `previous` is 0).
    pub percent: f64,
    pub direction: Direction,
    pub text: String,
}

/// Structured report for one (product, metric) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub product: String,
    pub metric_kind: MetricKind,
    pub report_date: NaiveDate,
    pub current_count: f64,
    pub day_over_day_text: String,
    pub week_over_week_text: String,
    pub month_over_month_text: String,
    /// Percentage of flagged days in the recent display window.
    pub anomaly_rate_percent: f64,
    /// `"x.xx%"` or the "no anomalies" sentinel.
    pub anomaly_rate: String,
    pub forecast_artifact_ref: Option<String>,
    pub anomaly_artifact_ref: Option<String>,
}

/// Serialize booleans as `0`/`1` so both detector modes produce the same column type.
pub(crate) mod int_flag {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*flag))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim() {
            "1" | "true" | "True" => Ok(true),
            "0" | "false" | "False" => Ok(false),
            other => Err(D::Error::custom(format!("invalid anomaly flag '{other}'"))),
        }
    }
}
