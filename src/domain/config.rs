//! Run configuration.
//!
//! `RunOptions` is the raw, user-facing set of knobs (CLI flags plus defaults).
//! `RunConfig` is the only thing the pipeline accepts: it can only be built
//! through `RunConfig::new`, which rejects invalid values and combinations.

use std::ops::Deref;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::domain::{ChartType, Language, MetricKind};
use crate::error::{EngineError, Result};

pub const DEFAULT_THRESHOLD: f64 = 2.5;
pub const DEFAULT_BACK_RANGE: u32 = 90;
pub const DEFAULT_FORWARD_RANGE: u32 = 60;
pub const DEFAULT_FORECAST_RANGE: u32 = 365;

/// Every recognised run option.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Source CSV.
    pub input: PathBuf,
    pub date_column: String,
    pub product_column: String,
    /// Restrict the run to a single product (otherwise every product in table order).
    pub product: Option<String>,
    pub metrics: Vec<MetricKind>,
    /// Reference date ("today") for comparisons, windows and artifact names.
    pub today: NaiveDate,
    /// Anomaly multiplier (z-score or residual std).
    pub threshold: f64,
    /// Days before `today` shown in charts and used for the anomaly rate.
    pub back_range: u32,
    /// Days after `today` shown in forecast charts.
    pub forward_range: u32,
    /// Forecast horizon in days.
    pub forecast_range: u32,
    pub chart_type: ChartType,
    pub language: Language,
    pub output_dir: PathBuf,
    pub chart_dir: PathBuf,
    pub report_dir: PathBuf,
    /// Seed for the forecaster's uncertainty simulation.
    pub seed: u64,
}

impl RunOptions {
    pub fn new(input: impl Into<PathBuf>, today: NaiveDate) -> Self {
        Self {
            input: input.into(),
            date_column: "txn_date".to_string(),
            product_column: "software_product".to_string(),
            product: None,
            metrics: MetricKind::ALL.to_vec(),
            today,
            threshold: DEFAULT_THRESHOLD,
            back_range: DEFAULT_BACK_RANGE,
            forward_range: DEFAULT_FORWARD_RANGE,
            forecast_range: DEFAULT_FORECAST_RANGE,
            chart_type: ChartType::Auto,
            language: Language::En,
            output_dir: PathBuf::from("data/output"),
            chart_dir: PathBuf::from("docs"),
            report_dir: PathBuf::from("data/report"),
            seed: 42,
        }
    }
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    options: RunOptions,
}

impl RunConfig {
    pub fn new(options: RunOptions) -> Result<Self> {
        if !(options.threshold.is_finite() && options.threshold > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "threshold must be finite and > 0 (got {})",
                options.threshold
            )));
        }
        if options.back_range == 0 {
            return Err(EngineError::InvalidConfig("back_range must be at least 1 day".to_string()));
        }
        if options.forecast_range == 0 {
            return Err(EngineError::InvalidConfig(
                "forecast_range must be at least 1 day".to_string(),
            ));
        }
        if options.forward_range > options.forecast_range {
            return Err(EngineError::InvalidConfig(format!(
                "forward_range ({}) cannot exceed forecast_range ({})",
                options.forward_range, options.forecast_range
            )));
        }
        if options.metrics.is_empty() {
            return Err(EngineError::InvalidConfig("at least one metric is required".to_string()));
        }
        let mut seen = options.metrics.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != options.metrics.len() {
            return Err(EngineError::InvalidConfig("metrics must not repeat".to_string()));
        }
        if options.date_column.trim().is_empty() || options.product_column.trim().is_empty() {
            return Err(EngineError::InvalidConfig("column names must not be empty".to_string()));
        }
        if options
            .date_column
            .trim()
            .eq_ignore_ascii_case(options.product_column.trim())
        {
            return Err(EngineError::InvalidConfig(
                "date and product columns must differ".to_string(),
            ));
        }
        if let Some(product) = &options.product {
            if product.trim().is_empty() {
                return Err(EngineError::InvalidConfig(
                    "product filter must not be blank".to_string(),
                ));
            }
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }
}

impl Deref for RunConfig {
    type Target = RunOptions;

    fn deref(&self) -> &RunOptions {
        &self.options
    }
}
