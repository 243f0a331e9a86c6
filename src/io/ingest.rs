//! CSV ingest.
//!
//! This module turns a daily transaction export into a `RawTable`: one
//! `RawRecord` per CSV row with a parsed date, an optional product discriminator
//! and every other column kept as a nullable number.
//!
//! Design goals:
//! - **Strict schema** for the date column (clear errors + exit code 2)
//! - **Row-level validation** (skip rows with bad dates, but report what happened)
//! - **Nulls stay nulls**: empty or non-numeric metric cells are `None`; filling
//!   is the series loader's job
//! - **Separation of concerns**: no statistics here

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use tracing::{info, warn};

use crate::error::{EngineError, Result};

/// Which columns carry the date and product discriminator.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub date_column: String,
    /// `None` when the table describes a single product.
    pub product_column: Option<String>,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            date_column: "txn_date".to_string(),
            product_column: Some("software_product".to_string()),
        }
    }
}

/// One source row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based CSV line.
    pub line: usize,
    pub transaction_date: NaiveDate,
    pub software_product: Option<String>,
    /// Values aligned with `RawTable::metric_columns`.
    pub metrics: Vec<Option<f64>>,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Parsed table: normalized header names plus records.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub date_column: String,
    pub product_column: Option<String>,
    pub metric_columns: Vec<String>,
    pub records: Vec<RawRecord>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

impl RawTable {
    /// Index of a metric column (names are compared after normalization).
    pub fn metric_index(&self, column: &str) -> Option<usize> {
        let wanted = normalize_header_name(column);
        self.metric_columns.iter().position(|c| *c == wanted)
    }

    /// Distinct products in first-seen order.
    pub fn products(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for r in &self.records {
            if let Some(p) = &r.software_product {
                if !out.iter().any(|seen| seen.eq_ignore_ascii_case(p)) {
                    out.push(p.clone());
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Load a CSV file into a `RawTable`.
pub fn load_raw_table(path: &Path, schema: &TableSchema) -> Result<RawTable> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let table = read_raw_table(file, schema)?;
    info!(
        path = %path.display(),
        rows_read = table.rows_read,
        rows_used = table.records.len(),
        row_errors = table.row_errors.len(),
        "loaded input table"
    );
    Ok(table)
}

/// Parse CSV content from any reader.
pub fn read_raw_table<R: Read>(reader: R, schema: &TableSchema) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| EngineError::Format(format!("failed to read CSV headers: {e}")))?
        .clone();

    let header_map = build_header_map(&headers);

    let date_column = normalize_header_name(&schema.date_column);
    let date_idx = *header_map.get(&date_column).ok_or_else(|| EngineError::Schema {
        column: schema.date_column.clone(),
    })?;

    // A configured product column that doesn't exist means the table is single-product.
    let product_column = schema
        .product_column
        .as_deref()
        .map(normalize_header_name)
        .filter(|name| header_map.contains_key(name));
    let product_idx = product_column.as_ref().and_then(|name| header_map.get(name).copied());

    let mut metric_columns = Vec::new();
    let mut metric_idx = Vec::new();
    for (idx, name) in headers.iter().enumerate() {
        if idx == date_idx || Some(idx) == product_idx {
            continue;
        }
        metric_columns.push(normalize_header_name(name));
        metric_idx.push(idx);
    }

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: records() starts after the header, and CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let raw_date = record.get(date_idx).map(str::trim).unwrap_or("");
        let transaction_date = match parse_date(raw_date) {
            Ok(d) => d,
            Err(message) => {
                row_errors.push(RowError { line, message });
                continue;
            }
        };

        let software_product = product_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let metrics = metric_idx
            .iter()
            .map(|&i| parse_opt_f64(record.get(i)))
            .collect();

        records.push(RawRecord {
            line,
            transaction_date,
            software_product,
            metrics,
        });
    }

    if !row_errors.is_empty() {
        warn!(count = row_errors.len(), "skipped rows with unreadable dates or CSV errors");
    }

    Ok(RawTable {
        date_column,
        product_column,
        metric_columns,
        records,
        row_errors,
        rows_read,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Excel and other tools sometimes emit UTF-8 CSVs with a BOM prefix on the
    // first header. If we don't strip it, schema validation will incorrectly
    // report missing columns.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Parse a transaction date.
///
/// Exports show up as plain ISO dates, slash-separated dates, or pandas-style
/// timestamps at midnight.
pub fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    const FMTS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.date());
    }
    Err(format!(
        "Invalid date '{s}'. Expected one of: {}.",
        ["YYYY-MM-DD", "YYYY/MM/DD", "DD/MM/YYYY", "YYYY-MM-DD HH:MM:SS"].join(", ")
    ))
}

fn parse_opt_f64(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}txn_date,software_product,new_merchant,active_merchant\n\
        2025-01-01,Retail,5,100\n\
        2025-01-02,Retail,,101\n\
        not-a-date,Retail,1,1\n\
        2025-01-01,FnB,2,40\n";

    #[test]
    fn reads_rows_and_keeps_nulls() {
        let table = read_raw_table(SAMPLE.as_bytes(), &TableSchema::default()).unwrap();
        assert_eq!(table.rows_read, 4);
        assert_eq!(table.records.len(), 3);
        assert_eq!(table.row_errors.len(), 1);
        assert_eq!(table.row_errors[0].line, 4);
        assert_eq!(table.metric_columns, vec!["new_merchant", "active_merchant"]);

        let second = &table.records[1];
        assert_eq!(second.metrics, vec![None, Some(101.0)]);
        assert_eq!(table.products(), vec!["Retail".to_string(), "FnB".to_string()]);
    }

    #[test]
    fn missing_date_column_is_a_schema_error() {
        let schema = TableSchema {
            date_column: "ds".to_string(),
            product_column: None,
        };
        let err = read_raw_table(SAMPLE.as_bytes(), &schema).unwrap_err();
        assert_eq!(err, EngineError::Schema { column: "ds".to_string() });
    }

    #[test]
    fn parses_timestamp_dates() {
        let d = parse_date("2025-06-23 00:00:00").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 6, 23).unwrap());
        assert!(parse_date("23.06.2025").is_err());
    }
}
