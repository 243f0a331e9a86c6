//! Mathematical utilities: basis functions, least squares, descriptive statistics.

pub mod basis;
pub mod ols;
pub mod stats;

pub use basis::*;
pub use ols::*;
pub use stats::*;
