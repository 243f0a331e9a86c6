//! Forecasting.
//!
//! `forecast` fits an additive trend + seasonality + holiday model to a clean
//! series and returns one `ForecastPoint` per training date plus `horizon`
//! future days:
//!
//! - `yhat`, `yhat_lower`, `yhat_upper` are clipped at zero
//! - `is_forecast` is set wherever no observed (pre-fill) value exists
//! - error columns are filled only where a value was observed
//!
//! Identical input and configuration (including `seed`) give identical output.

pub mod accuracy;
pub mod calendar;
pub mod fitter;
pub mod model;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::domain::{AccuracySummary, DEFAULT_FORECAST_RANGE, ForecastPoint, Series};
use crate::error::{EngineError, Result};

pub use accuracy::{annotate_errors, summarize};
pub use calendar::{CalendarEvent, HolidayCalendar, HolidayFeature};
pub use fitter::{Components, FittedModel, fit};
pub use model::{DesignLayout, Seasonality, TimeScale, place_changepoints};

/// Minimum number of training points.
pub const MIN_FORECAST_POINTS: usize = 30;

/// Forecaster settings.
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Future days to project beyond the last training date.
    pub horizon: u32,
    /// Inclusive training window.
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub n_changepoints: usize,
    /// Share of the history in which changepoints are placed.
    pub changepoint_range: f64,
    /// Laplace scale of the changepoint deltas.
    pub changepoint_prior_scale: f64,
    pub seasonalities: Vec<Seasonality>,
    pub holidays_prior_scale: f64,
    pub calendar: HolidayCalendar,
    pub interval_width: f64,
    pub uncertainty_samples: usize,
    pub seed: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: DEFAULT_FORECAST_RANGE,
            start: None,
            end: None,
            n_changepoints: 35,
            changepoint_range: 0.9,
            changepoint_prior_scale: 0.08,
            seasonalities: Seasonality::merchant_defaults(),
            holidays_prior_scale: 15.0,
            calendar: HolidayCalendar::vietnam(),
            interval_width: 0.9,
            uncertainty_samples: 1500,
            seed: 42,
        }
    }
}

impl ForecastConfig {
    pub fn with_horizon(mut self, horizon: u32) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_window(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_uncertainty_samples(mut self, samples: usize) -> Self {
        self.uncertainty_samples = samples;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "interval_width must be in (0, 1) (got {})",
                self.interval_width
            )));
        }
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "changepoint_range must be in (0, 1] (got {})",
                self.changepoint_range
            )));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.changepoint_prior_scale)
            || !positive(self.holidays_prior_scale)
            || self.seasonalities.iter().any(|s| !positive(s.prior_scale) || !positive(s.period))
        {
            return Err(EngineError::InvalidConfig(
                "prior scales and periods must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Forecast table plus its accuracy summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastOutput {
    pub points: Vec<ForecastPoint>,
    pub summary: AccuracySummary,
}

/// Fit and predict over the training window plus `config.horizon` days.
pub fn forecast(series: &Series, config: &ForecastConfig) -> Result<ForecastOutput> {
    config.validate()?;

    let history = series.between(config.start, config.end);
    if history.is_empty() {
        return Err(EngineError::EmptyInput(format!(
            "no `{}` rows in the forecast window",
            series.metric
        )));
    }
    if history.len() < MIN_FORECAST_POINTS {
        return Err(EngineError::InsufficientData {
            needed: MIN_FORECAST_POINTS,
            got: history.len(),
        });
    }

    let model = fit(&history, config)?;

    let Some(last) = history.last_date() else {
        return Err(EngineError::EmptyInput("empty forecast window".to_string()));
    };
    let dates: Vec<NaiveDate> = history
        .points
        .iter()
        .map(|p| p.date)
        .chain((1..=i64::from(config.horizon)).map(|h| last + Duration::days(h)))
        .collect();

    let components: Vec<Components> = dates.iter().map(|&d| model.components(d)).collect();
    let yhat: Vec<f64> = components.iter().map(Components::yhat).collect();
    let bounds = model.simulate_bounds(&dates, &yhat, config);

    let mut points: Vec<ForecastPoint> = dates
        .iter()
        .zip(components)
        .zip(yhat.iter().zip(bounds))
        .map(|((&date, c), (&y, (lo, hi)))| {
            let seasonal = |name: &str| {
                model
                    .layout
                    .seasonalities
                    .iter()
                    .position(|s| s.name == name)
                    .map_or(0.0, |i| c.seasonal[i])
            };
            let observed = history.observed_on(date);
            let yhat_lower = lo.max(0.0);
            let yhat_upper = hi.max(0.0);
            ForecastPoint {
                date,
                yhat: y.max(0.0),
                yhat_lower,
                yhat_upper,
                trend: c.trend,
                yearly: seasonal("yearly"),
                weekly: seasonal("weekly"),
                monthly: seasonal("monthly"),
                quarterly: seasonal("quarterly"),
                semi_annual: seasonal("semi_annual"),
                holidays: c.holidays,
                observed,
                is_forecast: observed.is_none(),
                confidence_width: yhat_upper - yhat_lower,
                residual: None,
                abs_error: None,
                pct_error: None,
            }
        })
        .collect();

    for p in &mut points {
        annotate_errors(p);
    }
    let summary = summarize(&points);

    debug!(
        sigma = model.sigma,
        changepoints = model.layout.changepoints.len(),
        columns = model.layout.n_columns(),
        "forecast model fitted"
    );
    info!(
        metric = %series.metric,
        product = series.product.as_deref().unwrap_or("all"),
        history = history.len(),
        horizon = config.horizon,
        mae = summary.mae,
        rmse = summary.rmse,
        mape = summary.mape,
        "forecast finished"
    );

    Ok(ForecastOutput { points, summary })
}
