//! Anomaly detection.
//!
//! Mode selection is purely by length:
//! - fewer than 20 points: z-score against the series mean/std
//! - 20 points or more: robust STL (weekly period) and a residual band
//!   `mean ± threshold·std`; if STL can't produce a result, a 7-day centred
//!   moving average stands in for the trend
//!
//! Detection never fails. Degenerate variance and decomposition failure are
//! reported on the `DetectionOutcome` and logged.

pub mod stl;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{DEFAULT_THRESHOLD, DecompositionResult, Series};
use crate::error::{EngineError, Result};
use crate::math::{mean, sample_std};

pub use stl::{Stl, StlResult};

/// Shortest series that is decomposed rather than z-scored.
pub const MIN_DECOMPOSITION_POINTS: usize = 20;
/// Weekly seasonality for daily data.
pub const SEASONAL_PERIOD: usize = 7;
/// Seasonal LOESS span used for daily merchant counts.
pub const SEASONAL_SMOOTHNESS: usize = 15;
/// Centred window of the moving-average fallback.
pub const FALLBACK_WINDOW: usize = 7;

const NEGLIGIBLE_STD: f64 = 1e-10;

/// Cutoff below which a std counts as zero, scaled to the magnitude of the data.
fn negligible_std(values: &[f64]) -> f64 {
    let max_abs = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    NEGLIGIBLE_STD * max_abs.max(1.0)
}

/// Which branch produced a `DetectionOutcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Short-series z-score.
    ZScore,
    /// Seasonal-trend decomposition.
    Stl,
    /// Decomposition failed; trend is a centred moving average.
    MovingAverage,
}

impl DetectionMode {
    pub fn label(self) -> &'static str {
        match self {
            DetectionMode::ZScore => "z-score",
            DetectionMode::Stl => "stl",
            DetectionMode::MovingAverage => "moving-average",
        }
    }
}

/// Residual band used in decomposition mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualBand {
    pub mean: f64,
    /// Std actually used (after any substitution).
    pub std: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ResidualBand {
    pub fn contains(&self, residual: f64) -> bool {
        residual >= self.lower && residual <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub mode: DetectionMode,
    pub rows: Vec<DecompositionResult>,
    pub band: Option<ResidualBand>,
    /// The measured std was negligible and a substitute was used.
    pub degenerate_variance: bool,
}

impl DetectionOutcome {
    pub fn anomaly_count(&self) -> usize {
        self.rows.iter().filter(|r| r.anomaly).count()
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &DecompositionResult> {
        self.rows.iter().filter(|r| r.anomaly)
    }
}

/// Flags anomalous days in a clean series.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    threshold: f64,
    stl: Stl,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            stl: weekly_stl(),
        }
    }
}

impl AnomalyDetector {
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "anomaly threshold must be finite and > 0 (got {threshold})"
            )));
        }
        Ok(Self {
            threshold,
            ..Self::default()
        })
    }

    /// Replace the decomposer (tests and tuning).
    pub fn with_stl(mut self, stl: Stl) -> Self {
        self.stl = stl;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// One `DecompositionResult` per input point, in input order.
    pub fn detect(&self, series: &Series) -> DetectionOutcome {
        let values = series.values();
        if values.len() < MIN_DECOMPOSITION_POINTS {
            return self.detect_zscore(series, &values);
        }

        let (mode, trend, seasonal, residual) = match self.stl.decompose(&values) {
            Some(res) => (DetectionMode::Stl, res.trend, res.seasonal, res.remainder),
            None => {
                warn!(
                    metric = %series.metric,
                    points = values.len(),
                    "seasonal decomposition failed, using moving-average trend"
                );
                let (trend, seasonal, residual) =
                    moving_average_decomposition(&values, FALLBACK_WINDOW);
                (DetectionMode::MovingAverage, trend, seasonal, residual)
            }
        };

        let negligible = negligible_std(&values);
        let res_mean = mean(&residual);
        let mut res_std = sample_std(&residual);
        let mut degenerate_variance = false;
        if res_std < negligible {
            degenerate_variance = true;
            res_std = 0.1 * sample_std(&values);
            if res_std < negligible {
                res_std = 1.0;
            }
        }

        let band = ResidualBand {
            mean: res_mean,
            std: res_std,
            lower: res_mean - self.threshold * res_std,
            upper: res_mean + self.threshold * res_std,
        };

        let rows: Vec<DecompositionResult> = series
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| DecompositionResult {
                date: p.date,
                value: p.value,
                trend: trend[i],
                seasonal: seasonal[i],
                residual: residual[i],
                anomaly: !band.contains(residual[i]),
                threshold_upper: Some(band.upper),
                threshold_lower: Some(band.lower),
            })
            .collect();

        let outcome = DetectionOutcome {
            mode,
            rows,
            band: Some(band),
            degenerate_variance,
        };
        log_outcome(series, &outcome);
        outcome
    }

    fn detect_zscore(&self, series: &Series, values: &[f64]) -> DetectionOutcome {
        let m = mean(values);
        let mut std = sample_std(values);
        let mut degenerate_variance = false;
        if std < negligible_std(values) {
            degenerate_variance = true;
            std = 1.0;
        }

        let rows = series
            .points
            .iter()
            .map(|p| DecompositionResult {
                date: p.date,
                value: p.value,
                trend: p.value,
                seasonal: 0.0,
                residual: p.value - m,
                anomaly: ((p.value - m) / std).abs() > self.threshold,
                threshold_upper: None,
                threshold_lower: None,
            })
            .collect();

        let outcome = DetectionOutcome {
            mode: DetectionMode::ZScore,
            rows,
            band: None,
            degenerate_variance,
        };
        log_outcome(series, &outcome);
        outcome
    }
}

/// Robust weekly STL used for daily merchant counts.
pub fn weekly_stl() -> Stl {
    Stl::new(SEASONAL_PERIOD)
        .with_seasonal_smoothness(SEASONAL_SMOOTHNESS)
        .robust()
}

/// Centred moving-average trend, zero seasonal, `value - trend` residual.
///
/// Positions without a full window take the series mean as their trend.
pub fn moving_average_decomposition(
    values: &[f64],
    window: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = values.len();
    let window = window.max(1);
    let fill = mean(values);
    let before = (window - 1) / 2;
    let after = window - 1 - before;

    let trend: Vec<f64> = (0..n)
        .map(|i| {
            if i < before || i + after >= n {
                fill
            } else {
                mean(&values[i - before..=i + after])
            }
        })
        .collect();
    let residual = values.iter().zip(&trend).map(|(v, t)| v - t).collect();
    (trend, vec![0.0; n], residual)
}

/// Percentage of flagged days in `[today - back_range, today]`.
///
/// Returns `0.0` when no row falls in the window.
pub fn anomaly_rate(rows: &[DecompositionResult], today: NaiveDate, back_range: u32) -> f64 {
    let start = today - Duration::days(i64::from(back_range));
    let (total, flagged) = rows
        .iter()
        .filter(|r| r.date >= start && r.date <= today)
        .fold((0usize, 0usize), |(t, f), r| (t + 1, f + usize::from(r.anomaly)));
    if total == 0 {
        0.0
    } else {
        flagged as f64 / total as f64 * 100.0
    }
}

fn log_outcome(series: &Series, outcome: &DetectionOutcome) {
    if outcome.degenerate_variance {
        warn!(
            metric = %series.metric,
            mode = outcome.mode.label(),
            "near-zero variance, substituted a fallback std"
        );
    }
    debug!(
        product = series.product.as_deref().unwrap_or("all"),
        metric = %series.metric,
        mode = outcome.mode.label(),
        points = outcome.rows.len(),
        anomalies = outcome.anomaly_count(),
        "anomaly detection finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeSeriesPoint;

    fn series(values: &[f64]) -> Series {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        Series {
            product: Some("Retail".to_string()),
            metric: "new_merchant".to_string(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, &value)| TimeSeriesPoint {
                    date: start + Duration::days(i as i64),
                    value,
                    imputed: false,
                })
                .collect(),
        }
    }

    #[test]
    fn short_series_flags_the_spike_only() {
        let values = [10.0, 10.0, 11.0, 9.0, 10.0, 50.0, 10.0, 9.0, 11.0, 10.0];
        let out = AnomalyDetector::new(2.5).unwrap().detect(&series(&values));

        assert_eq!(out.mode, DetectionMode::ZScore);
        let flagged: Vec<usize> = out
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.anomaly)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![5]);
        assert!(out.rows.iter().all(|r| r.seasonal == 0.0 && r.threshold_upper.is_none()));
        assert_eq!(out.rows[5].trend, 50.0);
        assert!((out.rows[5].residual - 36.0).abs() < 1e-12);
    }

    #[test]
    fn mode_switches_at_twenty_points() {
        let det = AnomalyDetector::default();
        let values: Vec<f64> = (0..20).map(|i| 100.0 + (i % 7) as f64).collect();

        assert_eq!(det.detect(&series(&values[..19])).mode, DetectionMode::ZScore);
        let out = det.detect(&series(&values));
        assert_eq!(out.mode, DetectionMode::Stl);
        assert_eq!(out.rows.len(), 20);
        assert!(out.band.is_some());
    }

    #[test]
    fn constant_series_flags_nothing_in_either_mode() {
        let det = AnomalyDetector::default();
        for n in [10, 25] {
            let out = det.detect(&series(&vec![100.0; n]));
            assert_eq!(out.anomaly_count(), 0, "n = {n}");
            assert!(out.degenerate_variance);
        }
        let out = det.detect(&series(&vec![100.0; 25]));
        assert_eq!(out.band.unwrap().std, 1.0);
    }

    #[test]
    fn large_constant_series_flags_nothing() {
        let det = AnomalyDetector::default();
        for n in [10, 25, 200] {
            let out = det.detect(&series(&vec![987_654.321; n]));
            assert_eq!(out.anomaly_count(), 0, "n = {n}");
            assert!(out.degenerate_variance, "n = {n}");
            if let Some(band) = out.band {
                assert_eq!(band.std, 1.0);
            }
        }
    }

    #[test]
    fn failed_decomposition_falls_back_to_the_moving_average() {
        // A 30-day period needs 60 points, so 25 points cannot be decomposed.
        let mut values: Vec<f64> = (0..25).map(|i| 10.0 + (i % 2) as f64).collect();
        values[12] = 60.0;
        let out = AnomalyDetector::default()
            .with_stl(Stl::new(30))
            .detect(&series(&values));

        assert_eq!(out.mode, DetectionMode::MovingAverage);
        assert_eq!(out.rows.len(), 25);
        assert!(!out.degenerate_variance);
        let band = out.band.clone().unwrap();
        for row in &out.rows {
            assert_eq!(row.seasonal, 0.0);
            assert_eq!(row.anomaly, !band.contains(row.residual));
            assert_eq!(row.threshold_lower, Some(band.lower));
        }
        // Edges without a full window take the series mean as trend.
        assert!((out.rows[0].trend - 312.0 / 25.0).abs() < 1e-12);
        let flagged: Vec<usize> = out
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.anomaly)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![12]);
    }

    #[test]
    fn decomposition_mode_flags_residual_outliers() {
        let pattern = [0.0, 3.0, 5.0, 4.0, 2.0, -7.0, -7.0];
        let mut values: Vec<f64> = (0..56)
            .map(|i| 200.0 + i as f64 + pattern[i % 7] + if i % 2 == 0 { 0.8 } else { -0.8 })
            .collect();
        values[30] += 80.0;

        let out = AnomalyDetector::default().detect(&series(&values));
        let band = out.band.unwrap();
        assert!(band.lower <= band.mean && band.mean <= band.upper);
        assert!(out.rows[30].anomaly);
        for row in &out.rows {
            assert_eq!(row.anomaly, row.residual < band.lower || row.residual > band.upper);
        }
    }

    #[test]
    fn moving_average_fills_edges_with_the_mean() {
        let values: Vec<f64> = (1..=9).map(f64::from).collect();
        let (trend, seasonal, residual) = moving_average_decomposition(&values, 7);
        assert_eq!(trend[0], 5.0);
        assert_eq!(trend[2], 5.0);
        assert_eq!(trend[3], 4.0);
        assert_eq!(trend[5], 6.0);
        assert_eq!(trend[6], 5.0);
        assert!(seasonal.iter().all(|s| *s == 0.0));
        assert_eq!(residual[3], 0.0);
    }

    #[test]
    fn anomaly_rate_uses_the_back_range_window() {
        let values = [10.0, 10.0, 11.0, 9.0, 10.0, 50.0, 10.0, 9.0, 11.0, 10.0];
        let out = AnomalyDetector::default().detect(&series(&values));
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();

        assert!((anomaly_rate(&out.rows, today, 90) - 10.0).abs() < 1e-12);
        // Window 2025-01-07..=2025-01-10 excludes the spike on 2025-01-06.
        assert_eq!(anomaly_rate(&out.rows, today, 3), 0.0);
        assert_eq!(anomaly_rate(&[], today, 90), 0.0);
    }

    #[test]
    fn rejects_non_positive_threshold() {
        assert!(AnomalyDetector::new(0.0).is_err());
        assert!(AnomalyDetector::new(-1.0).is_err());
    }
}
