//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the clean series (`Series`, `TimeSeriesPoint`)
//! - detector, forecaster and report outputs
//! - the validated run configuration (`RunConfig`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
