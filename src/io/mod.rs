//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - raw table -> clean series (`series`)
//! - table/report exports (CSV/JSON) (`export`)

pub mod export;
pub mod ingest;
pub mod series;

pub use export::*;
pub use ingest::*;
pub use series::*;
