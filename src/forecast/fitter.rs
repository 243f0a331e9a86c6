//! MAP estimation and uncertainty simulation.
//!
//! Fitting:
//! - `y` is scaled by `max |y|`, time by the training span
//! - every coefficient has a zero-mean prior; the MAP estimate is a ridge
//!   regression with penalty `σ² / scale²` per column
//! - changepoint deltas use the Gaussian with the same variance as
//!   Laplace(0, changepoint_prior_scale)
//! - σ² is re-estimated from the residuals for a fixed number of passes,
//!   divided by `n - edf` (effective degrees of freedom of the ridge fit)
//! - seasonalities need two full cycles of history to enter the design
//! - a constant history skips the solve and keeps its level
//!
//! Uncertainty: each simulated path draws new trend changes beyond the
//! training window (Poisson count, Laplace magnitudes) plus Gaussian noise.
//! Seasonal and holiday terms are held at their MAP values.

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp1, Poisson, StandardNormal};
use tracing::debug;

use crate::domain::Series;
use crate::error::{EngineError, Result};
use crate::forecast::ForecastConfig;
use crate::forecast::model::{DesignLayout, TimeScale, place_changepoints};
use crate::math::{hinge, percentile_sorted, ridge_effective_dof, solve_ridge};

/// Prior scale of the base growth rate and offset.
const TREND_PRIOR_SCALE: f64 = 5.0;
/// Starting noise variance on the scaled axis.
const INITIAL_SIGMA2: f64 = 0.01;
/// Noise variance floor (σ ≥ 0.001 on the scaled axis).
const MIN_SIGMA2: f64 = 1e-6;
const FIT_PASSES: usize = 3;
/// Relative spread below which a history counts as constant.
const CONSTANT_TOLERANCE: f64 = 1e-12;

/// Per-date model components in original units.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub trend: f64,
    /// One entry per seasonality in the fitted layout, in layout order.
    pub seasonal: Vec<f64>,
    pub holidays: f64,
}

impl Components {
    pub fn yhat(&self) -> f64 {
        self.trend + self.seasonal.iter().sum::<f64>() + self.holidays
    }
}

/// A fitted model. Owned by one forecast call; never shared between fits.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub layout: DesignLayout,
    pub time: TimeScale,
    pub y_scale: f64,
    pub beta: DVector<f64>,
    /// Noise std on the scaled axis.
    pub sigma: f64,
}

impl FittedModel {
    pub fn k(&self) -> f64 {
        self.beta[0]
    }

    pub fn m(&self) -> f64 {
        self.beta[1]
    }

    pub fn deltas(&self) -> &[f64] {
        let r = self.layout.delta_range();
        &self.beta.as_slice()[r]
    }

    /// Trend on the scaled axis.
    fn scaled_trend(&self, t: f64) -> f64 {
        let bend: f64 = self
            .layout
            .changepoints
            .iter()
            .zip(self.deltas())
            .map(|(&s, &d)| d * hinge(t, s))
            .sum();
        self.k() * t + self.m() + bend
    }

    pub fn components(&self, date: NaiveDate) -> Components {
        let t = self.time.t(date);
        let row = self.layout.row(date, t);
        let dot = |range: std::ops::Range<usize>| -> f64 {
            range.map(|j| row[j] * self.beta[j]).sum::<f64>() * self.y_scale
        };
        Components {
            trend: self.scaled_trend(t) * self.y_scale,
            seasonal: (0..self.layout.seasonalities.len())
                .map(|i| dot(self.layout.seasonal_range(i)))
                .collect(),
            holidays: dot(self.layout.holiday_range()),
        }
    }

    /// `(lower, upper)` interval bounds per date from simulated paths.
    ///
    /// `yhat` holds the deterministic prediction for each date; with zero
    /// samples the bounds collapse onto it.
    pub fn simulate_bounds(
        &self,
        dates: &[NaiveDate],
        yhat: &[f64],
        config: &ForecastConfig,
    ) -> Vec<(f64, f64)> {
        let samples = config.uncertainty_samples;
        if samples == 0 || dates.is_empty() {
            return yhat.iter().map(|&y| (y, y)).collect();
        }

        let ts: Vec<f64> = dates.iter().map(|&d| self.time.t(d)).collect();
        let t_max = ts.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let n_cp = self.layout.changepoints.len() as f64;
        let change_rate = if t_max > 1.0 { n_cp * (t_max - 1.0) } else { 0.0 };
        let poisson = Poisson::new(change_rate).ok();
        let laplace_scale = self.deltas().iter().map(|d| d.abs()).sum::<f64>()
            / self.deltas().len().max(1) as f64
            + 1e-8;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut paths: Vec<Vec<f64>> = vec![Vec::with_capacity(samples); dates.len()];

        for _ in 0..samples {
            let n_changes = match &poisson {
                Some(p) => {
                    let draw: f64 = p.sample(&mut rng);
                    draw as usize
                }
                None => 0,
            };
            let new_changes: Vec<(f64, f64)> = (0..n_changes)
                .map(|_| {
                    let at = rng.gen_range(1.0..t_max);
                    let magnitude: f64 = rng.sample::<f64, _>(Exp1) * laplace_scale;
                    let delta = if rng.gen_bool(0.5) { magnitude } else { -magnitude };
                    (at, delta)
                })
                .collect();

            for (i, &t) in ts.iter().enumerate() {
                let extra: f64 = new_changes.iter().map(|&(s, d)| d * hinge(t, s)).sum();
                let noise: f64 = rng.sample::<f64, _>(StandardNormal) * self.sigma;
                paths[i].push(yhat[i] + (extra + noise) * self.y_scale);
            }
        }

        let lower_q = (1.0 - config.interval_width) / 2.0 * 100.0;
        let upper_q = (1.0 + config.interval_width) / 2.0 * 100.0;
        paths
            .into_iter()
            .map(|mut p| {
                p.sort_by(f64::total_cmp);
                (percentile_sorted(&p, lower_q), percentile_sorted(&p, upper_q))
            })
            .collect()
    }
}

/// Fit the additive model to a (filled) history.
pub fn fit(series: &Series, config: &ForecastConfig) -> Result<FittedModel> {
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return Err(EngineError::EmptyInput("nothing to fit".to_string()));
    };

    let time = TimeScale::new(first, last);
    let t_history: Vec<f64> = series.points.iter().map(|p| time.t(p.date)).collect();

    let y = series.values();
    let max_abs = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let y_scale = if max_abs > 1e-10 { max_abs } else { 1.0 };
    let y_scaled = DVector::from_iterator(y.len(), y.iter().map(|v| v / y_scale));

    let layout = DesignLayout {
        changepoints: place_changepoints(
            &t_history,
            config.n_changepoints,
            config.changepoint_range,
        ),
        seasonalities: config
            .seasonalities
            .iter()
            .filter(|s| s.fits_span(time.span_days))
            .cloned()
            .collect(),
        holidays: config.calendar.features(),
    };

    let n = series.len();
    let p = layout.n_columns();

    // A flat history is its own forecast: offset only, noise at the floor.
    let tolerance = CONSTANT_TOLERANCE * max_abs.max(1.0);
    if y.iter().all(|v| (v - y[0]).abs() <= tolerance) {
        debug!(points = n, level = y[0], "constant history; skipping the fit");
        let mut beta = DVector::<f64>::zeros(p);
        beta[1] = y[0] / y_scale;
        return Ok(FittedModel {
            layout,
            time,
            y_scale,
            beta,
            sigma: MIN_SIGMA2.sqrt(),
        });
    }

    let mut x = DMatrix::<f64>::zeros(n, p);
    for (i, point) in series.points.iter().enumerate() {
        for (j, v) in layout.row(point.date, t_history[i]).into_iter().enumerate() {
            x[(i, j)] = v;
        }
    }

    // Laplace(0, b) has variance 2b².
    let delta_scale = std::f64::consts::SQRT_2 * config.changepoint_prior_scale;
    let scales = layout.prior_scales(TREND_PRIOR_SCALE, delta_scale, config.holidays_prior_scale);

    let mut sigma2 = INITIAL_SIGMA2;
    let mut beta = DVector::<f64>::zeros(p);
    for pass in 0..FIT_PASSES {
        let penalties: Vec<f64> = scales.iter().map(|s| sigma2 / (s * s)).collect();
        beta = solve_ridge(&x, &y_scaled, &penalties).ok_or_else(|| {
            EngineError::Fit("penalized least squares did not converge".to_string())
        })?;

        // Residual variance on n - edf degrees of freedom.
        let edf = ridge_effective_dof(&x, &penalties).unwrap_or(0.0);
        let rss = (&y_scaled - &x * &beta).norm_squared();
        sigma2 = (rss / (n as f64 - edf).max(1.0)).max(MIN_SIGMA2);
        debug!(pass, sigma = sigma2.sqrt(), edf, columns = p, "forecast fit pass");
    }

    Ok(FittedModel {
        layout,
        time,
        y_scale,
        beta,
        sigma: sigma2.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeSeriesPoint;
    use crate::forecast::calendar::HolidayCalendar;
    use crate::forecast::model::Seasonality;
    use chrono::Duration;
    use std::ops::RangeInclusive;

    fn series(values: impl IntoIterator<Item = f64>) -> Series {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        Series {
            product: None,
            metric: "active_merchant".to_string(),
            points: values
                .into_iter()
                .enumerate()
                .map(|(i, value)| TimeSeriesPoint {
                    date: start + Duration::days(i as i64),
                    value,
                    imputed: false,
                })
                .collect(),
        }
    }

    fn config() -> ForecastConfig {
        ForecastConfig {
            calendar: HolidayCalendar::empty(),
            uncertainty_samples: 200,
            ..ForecastConfig::default()
        }
    }

    // Long-period terms can mimic a trend over a short window; keep them out
    // when the test is about the trend itself.
    fn weekly_only() -> ForecastConfig {
        ForecastConfig {
            seasonalities: vec![Seasonality::new("weekly", 7.0, 3, 15.0)],
            ..config()
        }
    }

    #[test]
    fn recovers_a_linear_trend() {
        let s = series((0..60).map(|i| 100.0 + 2.0 * i as f64));
        let model = fit(&s, &weekly_only()).unwrap();
        let last = s.last_date().unwrap();

        let c = model.components(last);
        assert!((c.yhat() - 218.0).abs() < 3.0, "yhat {}", c.yhat());
        let ahead = model.components(last + Duration::days(10)).yhat();
        assert!((ahead - 238.0).abs() < 10.0, "ahead {ahead}");
    }

    #[test]
    fn weekly_component_picks_up_a_weekly_pattern() {
        let pattern = [0.0, 10.0, 20.0, 10.0, 0.0, -20.0, -20.0];
        let s = series((0..84).map(|i| 200.0 + pattern[i % 7]));
        let model = fit(&s, &config()).unwrap();
        let names: Vec<&str> = model.layout.seasonalities.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["weekly", "monthly"]);
        let weekly_idx = 0;

        let spread: Vec<f64> = (0..7)
            .map(|i| model.components(s.points[i].date).seasonal[weekly_idx])
            .collect();
        let max = spread.iter().copied().fold(f64::MIN, f64::max);
        let min = spread.iter().copied().fold(f64::MAX, f64::min);
        assert!(max - min > 10.0, "weekly spread {}", max - min);
    }

    #[test]
    fn simulation_is_seeded_and_widens_with_the_horizon() {
        // Up for a month, then down: the fit needs real changepoint deltas.
        let s = series((0..60).map(|i| {
            if i < 30 { 100.0 + 3.0 * i as f64 } else { 190.0 - 2.0 * (i - 30) as f64 }
        }));
        let cfg = weekly_only();
        let model = fit(&s, &cfg).unwrap();

        let last = s.last_date().unwrap();
        let dates: Vec<NaiveDate> = (1..=60).map(|h| last + Duration::days(h)).collect();
        let yhat: Vec<f64> = dates.iter().map(|&d| model.components(d).yhat()).collect();

        let a = model.simulate_bounds(&dates, &yhat, &cfg);
        let b = model.simulate_bounds(&dates, &yhat, &cfg);
        assert_eq!(a, b);
        for ((lo, hi), y) in a.iter().zip(&yhat) {
            assert!(lo <= y && y <= hi, "{lo} <= {y} <= {hi}");
        }
        let near = a[0].1 - a[0].0;
        let far = a[59].1 - a[59].0;
        assert!(far > near, "near {near} far {far}");
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn ahead(model: &FittedModel, last: NaiveDate, days: RangeInclusive<i64>) -> Vec<f64> {
        days.map(|h| model.components(last + Duration::days(h)).yhat()).collect()
    }

    #[test]
    fn constant_history_forecasts_its_level() {
        let s = series(std::iter::repeat_n(5.0, 30));
        let cfg = config();
        let model = fit(&s, &cfg).unwrap();
        let last = s.last_date().unwrap();

        let yhat = ahead(&model, last, 1..=90);
        assert!(yhat.iter().all(|y| (y - 5.0).abs() < 1e-6), "{yhat:?}");

        let dates: Vec<NaiveDate> = (1..=90).map(|h| last + Duration::days(h)).collect();
        for (lo, hi) in model.simulate_bounds(&dates, &yhat, &cfg) {
            assert!(hi - lo < 0.1, "{lo}..{hi}");
        }

        let zeros = fit(&series(std::iter::repeat_n(0.0, 30)), &cfg).unwrap();
        assert_eq!(zeros.components(last + Duration::days(7)).yhat(), 0.0);
    }

    #[test]
    fn noisy_flat_history_keeps_its_level() {
        let s = series((0..60).map(|i| 100.0 + ((i * 37) % 11) as f64 - 5.0));
        let model = fit(&s, &config()).unwrap();
        let last = s.last_date().unwrap();

        assert!(model.sigma > 0.01, "sigma {}", model.sigma);
        let near = mean(&ahead(&model, last, 1..=30));
        let far = mean(&ahead(&model, last, 61..=90));
        assert!((near - 100.0).abs() < 15.0, "days 1-30 mean {near}");
        assert!((far - 100.0).abs() < 30.0, "days 61-90 mean {far}");
    }

    #[test]
    fn short_weekly_history_keeps_its_level() {
        let pattern = [0.0, 10.0, 20.0, 10.0, 0.0, -20.0, -20.0];
        let s = series((0..30).map(|i| 200.0 + pattern[i % 7] + ((i * 37) % 11) as f64 - 5.0));
        let model = fit(&s, &config()).unwrap();
        let last = s.last_date().unwrap();

        let names: Vec<&str> = model.layout.seasonalities.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["weekly"]);
        let level = mean(&ahead(&model, last, 1..=28));
        assert!((level - 200.0).abs() < 30.0, "four-week mean {level}");
    }
}
