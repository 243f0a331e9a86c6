//! `txn-pulse` library crate.
//!
//! The binary (`pulse`) is a thin wrapper around this library so that:
//!
//! - detection and forecasting are testable without spawning processes
//! - the engine can be driven by other schedulers or services
//! - collaborators (charts, chat, git) stay behind narrow module boundaries

pub mod app;
pub mod chart;
pub mod cli;
pub mod detect;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod io;
pub mod math;
pub mod notify;
pub mod publish;
pub mod report;
