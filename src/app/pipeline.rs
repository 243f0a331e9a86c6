//! Per-pair pipeline shared by every CLI command.
//!
//! raw table -> series -> { detection, forecast } -> charts -> insight report
//!
//! Pairs are (product, metric) combinations. They share nothing but the
//! read-only raw table, so they run in parallel; results come back in pair order.
//! Detection and forecasting fail independently; the insight report is only
//! assembled when both succeeded.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::chart::{ChartWindow, render_anomaly_chart, render_forecast_chart};
use crate::detect::{AnomalyDetector, DetectionOutcome, anomaly_rate};
use crate::domain::{InsightReport, MetricKind, RunConfig};
use crate::error::{EngineError, Result};
use crate::forecast::{ForecastConfig, ForecastOutput, forecast};
use crate::io::export::{
    ALL_PRODUCTS, decorate_path, read_report_json, write_decomposition_csv, write_forecast_outputs,
    write_report_json,
};
use crate::io::ingest::{RawTable, TableSchema, load_raw_table};
use crate::io::series::{SeriesRequest, load_series};
use crate::report::{InsightContext, assemble_insight};

/// Which parts of the pipeline a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub detect: bool,
    pub forecast: bool,
    pub charts: bool,
    pub report: bool,
}

impl Stages {
    pub const ALL: Stages = Stages {
        detect: true,
        forecast: true,
        charts: true,
        report: true,
    };
    pub const DETECT: Stages = Stages {
        detect: true,
        forecast: false,
        charts: true,
        report: false,
    };
    pub const FORECAST: Stages = Stages {
        detect: false,
        forecast: true,
        charts: true,
        report: false,
    };
}

/// Files written for one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairArtifacts {
    pub anomalies_csv: Option<PathBuf>,
    pub forecast_csv: Option<PathBuf>,
    pub summary_csv: Option<PathBuf>,
    pub forecast_chart: Option<PathBuf>,
    pub anomaly_chart: Option<PathBuf>,
    pub report_json: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub product: String,
    pub metric: MetricKind,
    /// `None` when the stage wasn't requested.
    pub detection: Option<Result<DetectionOutcome>>,
    pub forecast: Option<Result<ForecastOutput>>,
    pub insight: Option<InsightReport>,
    pub artifacts: PairArtifacts,
}

impl PairOutcome {
    pub fn failed(&self) -> bool {
        matches!(self.detection, Some(Err(_))) || matches!(self.forecast, Some(Err(_)))
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub pairs: Vec<PairOutcome>,
}

impl RunOutput {
    pub fn insights(&self) -> Vec<InsightReport> {
        self.pairs.iter().filter_map(|p| p.insight.clone()).collect()
    }

    pub fn failures(&self) -> usize {
        self.pairs.iter().filter(|p| p.failed()).count()
    }
}

pub fn load_table(config: &RunConfig) -> Result<RawTable> {
    let schema = TableSchema {
        date_column: config.date_column.clone(),
        product_column: Some(config.product_column.clone()),
    };
    let table = load_raw_table(&config.input, &schema)?;
    if table.is_empty() {
        return Err(EngineError::EmptyInput(format!(
            "'{}' has no usable rows",
            config.input.display()
        )));
    }
    Ok(table)
}

/// (product, metric) pairs in table order; `None` product means "whole table".
pub fn pairs(table: &RawTable, config: &RunConfig) -> Vec<(Option<String>, MetricKind)> {
    let products: Vec<Option<String>> = match (&config.product, table.product_column.is_some()) {
        (Some(p), _) => vec![Some(p.trim().to_string())],
        (None, true) => table.products().into_iter().map(Some).collect(),
        (None, false) => vec![None],
    };
    products
        .into_iter()
        .flat_map(|p| config.metrics.iter().map(move |&m| (p.clone(), m)))
        .collect()
}

/// Load the input and run every pair.
pub fn run_all(config: &RunConfig, stages: Stages) -> Result<RunOutput> {
    let table = load_table(config)?;
    let pairs = pairs(&table, config);
    info!(pairs = pairs.len(), today = %config.today, "starting run");

    let outcomes: Vec<PairOutcome> = pairs
        .par_iter()
        .map(|(product, metric)| run_pair(&table, config, product.as_deref(), *metric, stages))
        .collect();

    let output = RunOutput { pairs: outcomes };
    info!(
        pairs = output.pairs.len(),
        failures = output.failures(),
        reports = output.pairs.iter().filter(|p| p.insight.is_some()).count(),
        "run finished"
    );
    Ok(output)
}

/// Run one (product, metric) pair end to end.
pub fn run_pair(
    table: &RawTable,
    config: &RunConfig,
    product: Option<&str>,
    metric: MetricKind,
    stages: Stages,
) -> PairOutcome {
    let label = product.unwrap_or(ALL_PRODUCTS).to_string();
    let mut outcome = PairOutcome {
        product: label.clone(),
        metric,
        detection: None,
        forecast: None,
        insight: None,
        artifacts: PairArtifacts::default(),
    };

    let mut request = SeriesRequest::new(metric.column()).range(None, Some(config.today));
    if let Some(p) = product {
        request = request.product(p);
    }
    let series = match load_series(table, &request) {
        Ok(s) => s,
        Err(err) => {
            warn!(product = %label, metric = metric.column(), error = %err, "skipping pair");
            if stages.detect {
                outcome.detection = Some(Err(err.clone()));
            }
            if stages.forecast {
                outcome.forecast = Some(Err(err));
            }
            return outcome;
        }
    };

    let chart_type = config.chart_type.resolve(metric);
    let window = ChartWindow::new(config.today, config.back_range, config.forward_range);
    let decorate = |path: &Path| decorate_path(path, &label, metric.column(), config.today);
    let title =
        |what: &str| format!("{label} · {} · {what}", metric.display_name(config.language));

    if stages.detect {
        let detection = AnomalyDetector::new(config.threshold)
            .map(|d| d.detect(&series))
            .and_then(|d| {
                let path = decorate(&config.output_dir.join("anomalies.csv"));
                write_decomposition_csv(&path, &d.rows)?;
                outcome.artifacts.anomalies_csv = Some(path);
                Ok(d)
            });
        if let Ok(d) = &detection {
            if stages.charts && d.anomaly_count() > 0 {
                let path = decorate(&config.chart_dir.join("anomalies.svg"));
                let rendered =
                    render_anomaly_chart(&path, &title("anomalies"), &d.rows, &window, chart_type);
                match rendered {
                    Ok(()) => outcome.artifacts.anomaly_chart = Some(path),
                    Err(err) => warn!(
                        product = %label,
                        metric = metric.column(),
                        error = %err,
                        "anomaly chart failed"
                    ),
                }
            }
        }
        if let Err(err) = &detection {
            warn!(product = %label, metric = metric.column(), error = %err, "detection failed");
        }
        outcome.detection = Some(detection);
    }

    if stages.forecast {
        let cfg = ForecastConfig::default()
            .with_horizon(config.forecast_range)
            .with_seed(config.seed);
        let result = forecast(&series, &cfg).and_then(|f| {
            let path = decorate(&config.output_dir.join("forecast.csv"));
            let summary = write_forecast_outputs(&path, &f.points, &f.summary)?;
            outcome.artifacts.forecast_csv = Some(path);
            outcome.artifacts.summary_csv = Some(summary);
            Ok(f)
        });
        if let Ok(f) = &result {
            if stages.charts {
                let path = decorate(&config.chart_dir.join("forecast.svg"));
                let rendered = render_forecast_chart(
                    &path,
                    &title("forecast"),
                    &f.points,
                    &window,
                    chart_type,
                );
                match rendered {
                    Ok(()) => outcome.artifacts.forecast_chart = Some(path),
                    Err(err) => warn!(
                        product = %label,
                        metric = metric.column(),
                        error = %err,
                        "forecast chart failed"
                    ),
                }
            }
        }
        if let Err(err) = &result {
            warn!(product = %label, metric = metric.column(), error = %err, "forecast failed");
        }
        outcome.forecast = Some(result);
    }

    if stages.report {
        if let (Some(Ok(detection)), Some(Ok(_))) = (&outcome.detection, &outcome.forecast) {
            let report = assemble_insight(
                &series,
                InsightContext {
                    product: label.clone(),
                    metric_kind: metric,
                    today: config.today,
                    language: config.language,
                    anomaly_rate_percent: anomaly_rate(
                        &detection.rows,
                        config.today,
                        config.back_range,
                    ),
                    forecast_artifact_ref: outcome
                        .artifacts
                        .forecast_chart
                        .as_deref()
                        .map(artifact_ref),
                    anomaly_artifact_ref: outcome
                        .artifacts
                        .anomaly_chart
                        .as_deref()
                        .map(artifact_ref),
                },
            );
            let path = decorate(&config.report_dir.join("report.json"));
            match write_report_json(&path, &report) {
                Ok(()) => {
                    outcome.artifacts.report_json = Some(path);
                    outcome.insight = Some(report);
                }
                Err(err) => warn!(
                    product = %label,
                    metric = metric.column(),
                    error = %err,
                    "report write failed"
                ),
            }
        } else {
            info!(
                product = %label,
                metric = metric.column(),
                "upstream stage failed; no report for this pair"
            );
        }
    }

    outcome
}

/// Forward-slash path string used as a chart reference.
fn artifact_ref(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Report JSONs written for `today`, sorted by file name.
pub fn collect_reports(report_dir: &Path, today: chrono::NaiveDate) -> Result<Vec<InsightReport>> {
    let suffix = format!("_{}.json", today.format("%Y%m%d"));
    let entries = std::fs::read_dir(report_dir).map_err(|e| EngineError::io(report_dir, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EngineError::io(report_dir, e))?.path();
        let is_report = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("report_") && n.ends_with(&suffix));
        if is_report {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|p| read_report_json(p)).collect()
}
