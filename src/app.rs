//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and initialises logging
//! - runs the per-pair pipeline
//! - prints terminal summaries
//! - optionally delivers reports and publishes artifacts

use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Command, CommonArgs, RunArgs, SendArgs};
use crate::domain::Language;
use crate::error::AppError;
use crate::notify::ChatClient;
use crate::publish::{GitPublisher, PublishOutcome};
use crate::report::{format_accuracy, format_detection, format_insight};

use self::pipeline::{RunOutput, Stages};

pub mod pipeline;

/// Rows shown per flagged-day table.
const MAX_ANOMALY_ROWS: usize = 10;

/// Entry point for the `pulse` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Detect(args) => handle_stage(args, Stages::DETECT),
        Command::Forecast(args) => handle_stage(args, Stages::FORECAST),
        Command::Send(args) => handle_send(args),
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "txn_pulse=info".to_string());

    // Logs go to stderr so stdout stays the report.
    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .try_init();
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = args.common.to_config()?;
    let output = pipeline::run_all(&config, Stages::ALL)?;
    print_output(&output, config.language);

    let reports = output.insights();
    if args.send {
        ChatClient::from_env()?.send(&reports, config.language)?;
    }
    if args.publish {
        match GitPublisher::from_env(".").publish(None)? {
            PublishOutcome::Clean => info!("nothing to publish"),
            PublishOutcome::Pushed { message } => info!(%message, "artifacts published"),
        }
    }

    finish(&output)
}

fn handle_stage(args: CommonArgs, stages: Stages) -> Result<(), AppError> {
    let config = args.to_config()?;
    let output = pipeline::run_all(&config, stages)?;
    print_output(&output, config.language);
    finish(&output)
}

fn handle_send(args: SendArgs) -> Result<(), AppError> {
    let today = args.today.unwrap_or_else(crate::cli::today);
    let reports = pipeline::collect_reports(&args.report_dir, today)?;
    if reports.is_empty() {
        return Err(AppError::new(
            3,
            format!("No reports for {today} in '{}'.", args.report_dir.display()),
        ));
    }
    ChatClient::from_env()?.send(&reports, args.language)?;
    println!("Delivered {} report(s) for {today}.", reports.len());
    Ok(())
}

fn print_output(output: &RunOutput, language: Language) {
    for pair in &output.pairs {
        let label = format!("{} / {}", pair.product, pair.metric.column());
        match &pair.detection {
            Some(Ok(d)) => print!("{}", format_detection(&label, d, MAX_ANOMALY_ROWS)),
            Some(Err(err)) => println!("{label}: detection failed: {err}"),
            None => {}
        }
        match &pair.forecast {
            Some(Ok(f)) => print!("{}", format_accuracy(&label, &f.summary)),
            Some(Err(err)) => println!("{label}: forecast failed: {err}"),
            None => {}
        }
        if let Some(report) = &pair.insight {
            println!("{}", format_insight(report, language));
        }
    }
}

/// Exit non-zero only when every pair failed.
fn finish(output: &RunOutput) -> Result<(), AppError> {
    let failures = output.failures();
    if failures > 0 && failures == output.pairs.len() {
        return Err(AppError::new(3, format!("All {failures} pair(s) failed.")));
    }
    if failures > 0 {
        warn!(failures, "some pairs failed; see the log above");
    }
    Ok(())
}
