//! Delimited and JSON exports.
//!
//! Every artifact is written through a sibling `.part` file and renamed into
//! place, so a failed run never leaves a truncated table behind.
//!
//! File names follow the `name_{product}_{metric token}_{YYYYMMDD}.ext`
//! convention (see `decorate_path`).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::domain::{
    AccuracySummary, DecompositionResult, ForecastPoint, InsightReport, metric_token,
};
use crate::error::{EngineError, Result};

/// Product label used in file names when the table has no product column.
pub const ALL_PRODUCTS: &str = "all";

/// Insert `_{product}_{token}_{YYYYMMDD}` before the extension.
///
/// `data/output/anomalies.csv` + (`Retail`, `active_merchant`, 2025-06-23)
/// becomes `data/output/anomalies_retail_active_20250623.csv`. Path separators
/// and `..` in the tokens become `_`, so the result stays next to `path`.
pub fn decorate_path(path: &Path, product: &str, metric: &str, date: NaiveDate) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!(
        "{stem}_{}_{}_{}",
        file_token(product),
        file_token(metric_token(metric)),
        date.format("%Y%m%d")
    );
    if let Some(ext) = path.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    path.with_file_name(name)
}

fn file_token(raw: &str) -> String {
    raw.trim().to_lowercase().replace(['/', '\\'], "_").replace("..", "_")
}

/// `forecast_x.csv` -> `forecast_x_summary.csv`.
pub fn summary_path(forecast_path: &Path) -> PathBuf {
    let stem = forecast_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    forecast_path.with_file_name(format!("{stem}_summary.csv"))
}

pub fn write_decomposition_csv(path: &Path, rows: &[DecompositionResult]) -> Result<()> {
    write_csv(path, rows)
}

pub fn read_decomposition_csv(path: &Path) -> Result<Vec<DecompositionResult>> {
    read_csv(path)
}

pub fn write_forecast_csv(path: &Path, rows: &[ForecastPoint]) -> Result<()> {
    write_csv(path, rows)
}

/// Forecast table plus its `_summary.csv` next to it. Both land or neither
/// does: a failed summary write removes the table again.
pub fn write_forecast_outputs(
    path: &Path,
    rows: &[ForecastPoint],
    summary: &AccuracySummary,
) -> Result<PathBuf> {
    write_forecast_csv(path, rows)?;
    let summary_file = summary_path(path);
    if let Err(err) = write_accuracy_summary(&summary_file, summary) {
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(summary_file)
}

pub fn read_forecast_csv(path: &Path) -> Result<Vec<ForecastPoint>> {
    read_csv(path)
}

/// Accuracy summary as a two-column `metric,value` table.
pub fn write_accuracy_summary(path: &Path, summary: &AccuracySummary) -> Result<()> {
    let rows = [
        ("MAE", format!("{}", summary.mae)),
        ("RMSE", format!("{}", summary.rmse)),
        ("MAPE", format!("{}", summary.mape)),
        ("Observed Points", summary.observed_point_count.to_string()),
        ("Forecast Points", summary.forecast_point_count.to_string()),
    ];
    atomic_write(path, |w| {
        let mut csv = csv::Writer::from_writer(w);
        csv.write_record(["metric", "value"]).map_err(format_err)?;
        for (metric, value) in &rows {
            csv.write_record([*metric, value.as_str()]).map_err(format_err)?;
        }
        csv.flush().map_err(|e| EngineError::Format(e.to_string()))
    })
}

pub fn write_report_json(path: &Path, report: &InsightReport) -> Result<()> {
    atomic_write(path, |w| {
        serde_json::to_writer_pretty(&mut *w, report)
            .map_err(|e| EngineError::Format(format!("failed to write report JSON: {e}")))?;
        w.write_all(b"\n").map_err(|e| EngineError::Format(e.to_string()))
    })
}

pub fn read_report_json(path: &Path) -> Result<InsightReport> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    serde_json::from_reader(file)
        .map_err(|e| EngineError::Format(format!("invalid report JSON '{}': {e}", path.display())))
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    atomic_write(path, |w| {
        let mut csv = csv::Writer::from_writer(w);
        for row in rows {
            csv.serialize(row).map_err(format_err)?;
        }
        csv.flush().map_err(|e| EngineError::Format(e.to_string()))
    })?;
    debug!(path = %path.display(), rows = rows.len(), "wrote table");
    Ok(())
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| EngineError::io(path, e))?;
    reader
        .deserialize()
        .enumerate()
        .map(|(idx, row)| {
            row.map_err(|e| {
                EngineError::Format(format!("{} line {}: {e}", path.display(), idx + 2))
            })
        })
        .collect()
}

fn atomic_write<F>(path: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }

    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let file = File::create(&part).map_err(|e| EngineError::io(&part, e))?;
    let mut writer = BufWriter::new(file);
    let written =
        body(&mut writer).and_then(|()| writer.flush().map_err(|e| EngineError::io(&part, e)));
    if let Err(err) = written {
        let _ = fs::remove_file(&part);
        return Err(err);
    }
    drop(writer);

    if let Err(e) = fs::rename(&part, path) {
        let _ = fs::remove_file(&part);
        return Err(EngineError::io(path, e));
    }
    Ok(())
}

fn format_err(e: csv::Error) -> EngineError {
    EngineError::Format(format!("CSV write failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn decorates_with_product_token_and_date() {
        let p = decorate_path(
            Path::new("data/output/anomalies.csv"),
            "Retail",
            "active_merchant",
            d(2025, 6, 23),
        );
        assert_eq!(p, PathBuf::from("data/output/anomalies_retail_active_20250623.csv"));

        let p = decorate_path(Path::new("chart"), "FnB", "new_merchant", d(2025, 1, 2));
        assert_eq!(p, PathBuf::from("chart_fnb_new_20250102"));
    }

    #[test]
    fn product_names_cannot_leave_the_directory() {
        let dir = Path::new("data/output");
        let base = dir.join("forecast.csv");
        for product in ["../x", "A/B", "..\\evil", "../../etc/passwd"] {
            let p = decorate_path(&base, product, "new_merchant", d(2025, 1, 2));
            assert_eq!(p.parent(), Some(dir), "{product}");
            let name = p.file_name().and_then(|n| n.to_str()).unwrap();
            assert!(!name.contains('/') && !name.contains('\\') && !name.contains(".."), "{name}");
        }
        let p = decorate_path(&base, "../x", "new_merchant", d(2025, 1, 2));
        assert_eq!(p, PathBuf::from("data/output/forecast___x_new_20250102.csv"));
        let p = decorate_path(&base, "A/B", "new_merchant", d(2025, 1, 2));
        assert_eq!(p, PathBuf::from("data/output/forecast_a_b_new_20250102.csv"));
    }

    #[test]
    fn failed_summary_write_removes_the_forecast_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast_retail_new_20250101.csv");
        let summary = AccuracySummary {
            mae: 1.0,
            rmse: 1.0,
            mape: 1.0,
            observed_point_count: 30,
            forecast_point_count: 30,
        };

        let written = write_forecast_outputs(&path, &[], &summary).unwrap();
        assert_eq!(written, summary_path(&path));
        assert!(path.exists() && written.exists());
        fs::remove_file(&path).unwrap();
        fs::remove_file(&written).unwrap();

        // A directory in the summary's place makes the final rename fail.
        fs::create_dir(summary_path(&path)).unwrap();
        assert!(write_forecast_outputs(&path, &[], &summary).is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("forecast_retail_new_20250101_summary.csv.part").exists());
    }

    #[test]
    fn summary_path_sits_next_to_forecast() {
        let p = summary_path(Path::new("out/forecast_retail_new_20250101.csv"));
        assert_eq!(p, PathBuf::from("out/forecast_retail_new_20250101_summary.csv"));
    }

    #[test]
    fn decomposition_table_round_trips_with_integer_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/anomalies.csv");
        let rows = vec![
            DecompositionResult {
                date: d(2025, 1, 1),
                value: 10.0,
                trend: 9.5,
                seasonal: 0.25,
                residual: 0.25,
                anomaly: false,
                threshold_upper: Some(1.5),
                threshold_lower: Some(-1.5),
            },
            DecompositionResult {
                date: d(2025, 1, 2),
                value: 50.0,
                trend: 50.0,
                seasonal: 0.0,
                residual: 36.6,
                anomaly: true,
                threshold_upper: None,
                threshold_lower: None,
            },
        ];
        write_decomposition_csv(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "date,value,trend,seasonal,residual,anomaly,threshold_upper,threshold_lower"
        ));
        assert!(text.contains("2025-01-02,50.0,50.0,0.0,36.6,1,,"));

        let back = read_decomposition_csv(&path).unwrap();
        assert_eq!(back, rows);
        assert!(!path.with_file_name("anomalies.csv.part").exists());
    }

    #[test]
    fn summary_csv_lists_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let summary = AccuracySummary {
            mae: 1.5,
            rmse: 2.0,
            mape: 12.5,
            observed_point_count: 40,
            forecast_point_count: 365,
        };
        write_accuracy_summary(&path, &summary).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "metric,value\nMAE,1.5\nRMSE,2\nMAPE,12.5\nObserved Points,40\nForecast Points,365\n"
        );
    }
}
