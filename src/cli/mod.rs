//! Command-line parsing for the merchant pulse pipeline.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! detection/forecasting code: every command turns its flags into a validated
//! `RunConfig` and hands off to `app::pipeline`.

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};

use crate::domain::{
    ChartType, DEFAULT_BACK_RANGE, DEFAULT_FORECAST_RANGE, DEFAULT_FORWARD_RANGE, DEFAULT_THRESHOLD,
    Language, MetricKind, RunConfig, RunOptions,
};
use crate::error::Result;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "pulse", version, about = "Daily merchant anomaly detection and forecasting")]
pub struct Cli {
    /// Emit logs as JSON lines (filter with RUST_LOG).
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Detect, forecast, chart and write one report per (product, metric) pair.
    Run(RunArgs),
    /// Anomaly detection only.
    Detect(CommonArgs),
    /// Forecast only.
    Forecast(CommonArgs),
    /// Deliver today's report JSONs to the chat webhook.
    Send(SendArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Post the reports to the chat webhook (GOOGLE_CHAT_WEBHOOK_URL).
    #[arg(long)]
    pub send: bool,

    /// Commit and push the generated artifacts (GIT_* variables).
    #[arg(long)]
    pub publish: bool,
}

/// Options shared by `run`, `detect` and `forecast`.
#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
    /// Source CSV with one row per date and product.
    #[arg(short, long, value_name = "CSV")]
    pub input: PathBuf,

    /// Reference date (YYYY-MM-DD); defaults to the local current date.
    #[arg(long, value_parser = parse_day)]
    pub today: Option<NaiveDate>,

    /// Restrict the run to one product.
    #[arg(short, long)]
    pub product: Option<String>,

    /// Metrics to process (repeatable); defaults to both.
    #[arg(short, long = "metric", value_enum)]
    pub metrics: Vec<MetricKind>,

    /// Anomaly multiplier for z-scores / residual std.
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f64,

    /// Days before "today" in charts and the anomaly rate.
    #[arg(long, default_value_t = DEFAULT_BACK_RANGE)]
    pub back_range: u32,

    /// Days after "today" in forecast charts.
    #[arg(long, default_value_t = DEFAULT_FORWARD_RANGE)]
    pub forward_range: u32,

    /// Forecast horizon in days.
    #[arg(long, default_value_t = DEFAULT_FORECAST_RANGE)]
    pub forecast_range: u32,

    #[arg(long, value_enum, default_value_t = ChartType::Auto)]
    pub chart_type: ChartType,

    #[arg(long, value_enum, default_value_t = Language::En)]
    pub language: Language,

    #[arg(long, default_value = "data/output")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = "docs")]
    pub chart_dir: PathBuf,

    #[arg(long, default_value = "data/report")]
    pub report_dir: PathBuf,

    /// Seed for the forecast interval simulation.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value = "txn_date")]
    pub date_column: String,

    #[arg(long, default_value = "software_product")]
    pub product_column: String,
}

#[derive(Debug, Args, Clone)]
pub struct SendArgs {
    #[arg(long, default_value = "data/report")]
    pub report_dir: PathBuf,

    /// Date of the reports to send; defaults to the local current date.
    #[arg(long, value_parser = parse_day)]
    pub today: Option<NaiveDate>,

    #[arg(long, value_enum, default_value_t = Language::En)]
    pub language: Language,
}

impl CommonArgs {
    pub fn to_config(&self) -> Result<RunConfig> {
        let mut opts = RunOptions::new(self.input.clone(), self.today.unwrap_or_else(today));
        opts.date_column = self.date_column.clone();
        opts.product_column = self.product_column.clone();
        opts.product = self.product.clone();
        if !self.metrics.is_empty() {
            opts.metrics = self.metrics.clone();
        }
        opts.threshold = self.threshold;
        opts.back_range = self.back_range;
        opts.forward_range = self.forward_range;
        opts.forecast_range = self.forecast_range;
        opts.chart_type = self.chart_type;
        opts.language = self.language;
        opts.output_dir = self.output_dir.clone();
        opts.chart_dir = self.chart_dir.clone();
        opts.report_dir = self.report_dir.clone();
        opts.seed = self.seed;
        RunConfig::new(opts)
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn parse_day(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}
