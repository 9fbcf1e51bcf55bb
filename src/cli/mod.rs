//! Command-line interface for patent-report.
//!
//! Provides commands for report generation, offline parsing, inspection of
//! stored reports, and schema migration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
