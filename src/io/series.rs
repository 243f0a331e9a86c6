//! Series loader: raw table -> clean univariate series.
//!
//! The loader is the only place that repairs data:
//! - product and date-range filtering
//! - summing duplicate dates (deterministic: dates are grouped in a `BTreeMap`)
//! - forward-fill then backward-fill of null values
//!
//! Downstream consumers never see raw nulls; `TimeSeriesPoint::imputed` records
//! which values were filled.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{Series, TimeSeriesPoint};
use crate::error::{EngineError, Result};
use crate::io::ingest::RawTable;

/// What to extract from a raw table.
#[derive(Debug, Clone, Default)]
pub struct SeriesRequest {
    pub metric: String,
    /// Product discriminator; `None` keeps every row.
    pub product: Option<String>,
    /// Inclusive lower date bound.
    pub start: Option<NaiveDate>,
    /// Inclusive upper date bound.
    pub end: Option<NaiveDate>,
}

impl SeriesRequest {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ..Self::default()
        }
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// Build a gap-free, date-sorted, single-value-per-date series.
pub fn load_series(table: &RawTable, request: &SeriesRequest) -> Result<Series> {
    let rows: Vec<_> = table
        .records
        .iter()
        .filter(|r| matches_filter(r.software_product.as_deref(), request.product.as_deref()))
        .collect();

    if rows.is_empty() {
        return Err(EngineError::EmptyInput(match &request.product {
            Some(p) => format!("no rows for product `{p}`"),
            None => "input table has no rows".to_string(),
        }));
    }

    let metric_idx = table.metric_index(&request.metric).ok_or_else(|| EngineError::Schema {
        column: request.metric.clone(),
    })?;

    let rows: Vec<_> = rows
        .into_iter()
        .filter(|r| {
            request.start.is_none_or(|s| r.transaction_date >= s)
                && request.end.is_none_or(|e| r.transaction_date <= e)
        })
        .collect();

    if rows.is_empty() {
        return Err(EngineError::EmptyInput(format!(
            "no rows between {} and {}",
            fmt_bound(request.start),
            fmt_bound(request.end)
        )));
    }

    // Group duplicate dates. A date stays null only if every contributing value is null.
    let mut grouped: BTreeMap<NaiveDate, Option<f64>> = BTreeMap::new();
    let mut duplicates = 0usize;
    for r in &rows {
        let value = r.metrics.get(metric_idx).copied().flatten();
        match grouped.get_mut(&r.transaction_date) {
            Some(slot) => {
                duplicates += 1;
                if let Some(v) = value {
                    *slot = Some(slot.unwrap_or(0.0) + v);
                }
            }
            None => {
                grouped.insert(r.transaction_date, value);
            }
        }
    }
    if duplicates > 0 {
        debug!(duplicates, metric = %request.metric, "summed duplicate dates");
    }

    let dates: Vec<NaiveDate> = grouped.keys().copied().collect();
    let raw: Vec<Option<f64>> = grouped.values().copied().collect();
    let filled = fill_forward_backward(&raw).ok_or_else(|| {
        EngineError::EmptyInput(format!("column `{}` has no non-null values", request.metric))
    })?;

    let points = dates
        .into_iter()
        .zip(raw.iter().zip(filled))
        .map(|(date, (orig, value))| TimeSeriesPoint {
            date,
            value,
            imputed: orig.is_none(),
        })
        .collect();

    Ok(Series {
        product: request.product.clone(),
        metric: request.metric.clone(),
        points,
    })
}

/// Forward-fill then backward-fill. Returns `None` if every value is null.
pub fn fill_forward_backward(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let first = values.iter().flatten().next().copied()?;

    let mut out = Vec::with_capacity(values.len());
    // Leading nulls take the first observed value (the backward fill).
    let mut last = first;
    for v in values {
        if let Some(v) = v {
            last = *v;
        }
        out.push(last);
    }
    Some(out)
}

fn matches_filter(value: Option<&str>, filter: Option<&str>) -> bool {
    let Some(filter) = filter else { return true };
    let Some(value) = value else { return false };
    value.trim().eq_ignore_ascii_case(filter.trim())
}

fn fmt_bound(d: Option<NaiveDate>) -> String {
    d.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}
