//! SVG charts for the chat card links.
//!
//! Two charts per (product, metric) pair:
//! - forecast: actuals, `yhat` and the interval band over
//!   `[today - back_range, today + forward_range]`
//! - anomalies: values over `[today - back_range, today]` with flagged days marked
//!
//! Data prep (`*_chart_data`) is separate from drawing so it can be tested
//! without touching the file system. The x axis is "days since window start";
//! tick labels are formatted back into dates.

use std::path::Path;

use chrono::{Duration, NaiveDate};
use plotters::prelude::*;
use tracing::info;

use crate::domain::{ChartType, DecompositionResult, ForecastPoint};
use crate::error::{EngineError, Result};

const SIZE: (u32, u32) = (1200, 560);

/// Display window around "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartWindow {
    pub start: NaiveDate,
    pub today: NaiveDate,
    pub end: NaiveDate,
}

impl ChartWindow {
    pub fn new(today: NaiveDate, back_range: u32, forward_range: u32) -> Self {
        Self {
            start: today - Duration::days(i64::from(back_range)),
            today,
            end: today + Duration::days(i64::from(forward_range)),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    fn x(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64
    }

    fn x_bounds(&self) -> (f64, f64) {
        (-1.0, self.x(self.end) + 1.0)
    }
}

/// Series for the forecast chart, already mapped onto the x axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastChartData {
    pub actual: Vec<(f64, f64)>,
    pub yhat: Vec<(f64, f64)>,
    /// `(x, lower, upper)`.
    pub band: Vec<(f64, f64, f64)>,
    pub y_max: f64,
}

pub fn forecast_chart_data(points: &[ForecastPoint], window: &ChartWindow) -> ForecastChartData {
    let mut data = ForecastChartData::default();
    for p in points.iter().filter(|p| window.contains(p.date)) {
        let x = window.x(p.date);
        if let Some(obs) = p.observed {
            data.actual.push((x, obs));
            data.y_max = data.y_max.max(obs);
        }
        data.yhat.push((x, p.yhat));
        data.band.push((x, p.yhat_lower, p.yhat_upper));
        data.y_max = data.y_max.max(p.yhat_upper).max(p.yhat);
    }
    data
}

/// Series for the anomaly chart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyChartData {
    pub values: Vec<(f64, f64)>,
    pub flagged: Vec<(f64, f64)>,
    pub y_max: f64,
}

pub fn anomaly_chart_data(rows: &[DecompositionResult], window: &ChartWindow) -> AnomalyChartData {
    let mut data = AnomalyChartData::default();
    for r in rows.iter().filter(|r| r.date >= window.start && r.date <= window.today) {
        let x = window.x(r.date);
        data.values.push((x, r.value));
        if r.anomaly {
            data.flagged.push((x, r.value));
        }
        data.y_max = data.y_max.max(r.value);
    }
    data
}

pub fn render_forecast_chart(
    path: &Path,
    title: &str,
    points: &[ForecastPoint],
    window: &ChartWindow,
    chart_type: ChartType,
) -> Result<()> {
    let data = forecast_chart_data(points, window);
    ensure_parent(path)?;
    draw_forecast(path, title, &data, window, chart_type)
        .map_err(|e| EngineError::io(path, format!("chart rendering failed: {e}")))?;
    info!(path = %path.display(), "wrote forecast chart");
    Ok(())
}

pub fn render_anomaly_chart(
    path: &Path,
    title: &str,
    rows: &[DecompositionResult],
    window: &ChartWindow,
    chart_type: ChartType,
) -> Result<()> {
    let data = anomaly_chart_data(rows, window);
    ensure_parent(path)?;
    draw_anomalies(path, title, &data, window, chart_type)
        .map_err(|e| EngineError::io(path, format!("chart rendering failed: {e}")))?;
    info!(path = %path.display(), anomalies = data.flagged.len(), "wrote anomaly chart");
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e)),
        None => Ok(()),
    }
}

type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

fn draw_forecast(
    path: &Path,
    title: &str,
    data: &ForecastChartData,
    window: &ChartWindow,
    chart_type: ChartType,
) -> DrawResult {
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let (x0, x1) = window.x_bounds();
    let y1 = headroom(data.y_max);
    let start = window.start;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(12)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x0..x1, 0.0..y1)?;

    chart
        .configure_mesh()
        .light_line_style(&WHITE)
        .x_labels(10)
        .y_labels(8)
        .x_label_formatter(&|v| day_label(start, *v))
        .y_label_formatter(&|v| format!("{v:.0}"))
        .draw()?;

    let band_color = RGBColor(31, 119, 180);
    let forecast_color = RGBColor(255, 127, 14);
    let actual_color = RGBColor(44, 62, 80);

    // Interval band as one polygon: upper edge forward, lower edge back.
    if data.band.len() > 1 {
        let mut outline: Vec<(f64, f64)> = data.band.iter().map(|&(x, _, hi)| (x, hi)).collect();
        outline.extend(data.band.iter().rev().map(|&(x, lo, _)| (x, lo)));
        chart
            .draw_series(std::iter::once(Polygon::new(outline, band_color.mix(0.18).filled())))?
            .label("90% interval")
            .legend(move |(x, y)| {
                Rectangle::new([(x, y - 5), (x + 16, y + 5)], band_color.mix(0.18).filled())
            });
    }

    match chart_type {
        ChartType::Bar => {
            chart
                .draw_series(data.actual.iter().map(|&(x, y)| {
                    Rectangle::new([(x - 0.4, 0.0), (x + 0.4, y)], actual_color.mix(0.7).filled())
                }))?
                .label("actual")
                .legend(move |(x, y)| {
                    Rectangle::new([(x, y - 5), (x + 16, y + 5)], actual_color.filled())
                });
        }
        ChartType::Line | ChartType::Auto => {
            chart
                .draw_series(LineSeries::new(
                    data.actual.iter().copied(),
                    actual_color.stroke_width(2),
                ))?
                .label("actual")
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], &actual_color));
        }
    }

    chart
        .draw_series(LineSeries::new(data.yhat.iter().copied(), forecast_color.stroke_width(2)))?
        .label("forecast")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], &forecast_color));

    // "Today" marker.
    let today_x = window.x(window.today);
    chart.draw_series(LineSeries::new(vec![(today_x, 0.0), (today_x, y1)], &RED.mix(0.5)))?;

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.85))
        .border_style(&BLACK)
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}

fn draw_anomalies(
    path: &Path,
    title: &str,
    data: &AnomalyChartData,
    window: &ChartWindow,
    chart_type: ChartType,
) -> DrawResult {
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let x1 = window.x(window.today) + 1.0;
    let y1 = headroom(data.y_max);
    let start = window.start;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(12)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(-1.0..x1, 0.0..y1)?;

    chart
        .configure_mesh()
        .light_line_style(&WHITE)
        .x_labels(10)
        .y_labels(8)
        .x_label_formatter(&|v| day_label(start, *v))
        .y_label_formatter(&|v| format!("{v:.0}"))
        .draw()?;

    let value_color = RGBColor(31, 119, 180);
    match chart_type {
        ChartType::Bar => {
            chart.draw_series(data.values.iter().map(|&(x, y)| {
                Rectangle::new([(x - 0.4, 0.0), (x + 0.4, y)], value_color.mix(0.7).filled())
            }))?;
        }
        ChartType::Line | ChartType::Auto => {
            chart.draw_series(LineSeries::new(
                data.values.iter().copied(),
                value_color.stroke_width(2),
            ))?;
        }
    }

    chart
        .draw_series(data.flagged.iter().map(|&(x, y)| Circle::new((x, y), 5, RED.filled())))?
        .label("anomaly")
        .legend(|(x, y)| Circle::new((x + 8, y), 5, RED.filled()));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.85))
        .border_style(&BLACK)
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}

fn headroom(y_max: f64) -> f64 {
    if y_max.is_finite() && y_max > 0.0 { y_max * 1.1 } else { 1.0 }
}

fn day_label(start: NaiveDate, x: f64) -> String {
    (start + Duration::days(x.round() as i64)).format("%d/%m").to_string()
}
