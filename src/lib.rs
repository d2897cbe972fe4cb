//! sacct-eff Library
//!
//! Efficiency reports for Slurm jobs. The library turns the text printed by
//! `sacct --parsable` into one row per job with CPU, memory, wall time and
//! (when jobstats admin comments are present) per-node and per-GPU
//! efficiency, then renders it as an aligned table or as `|` separated rows.
//!
//! ## Architecture Overview
//!
//! - [`parser`] - Accounting text into typed records; never fails on bad input
//! - [`aggregator`] - Folds job steps into one job per id and array index
//! - [`admin_comment`] - Decodes jobstats (`JS1:`) admin comments
//! - [`efficiency`] - CPU, memory, time and GPU efficiency
//! - [`filter`] - Job selection, state and time window filters, ordering
//! - [`display`] - Format tokens, column widths, colors and node rows
//! - [`analyzer`] - The pure pipeline tying the stages together
//! - [`inquirer`] - Runs `sacct` and `scontrol`
//! - [`file_discovery`] - Lists job output files in a directory
//! - [`config`] - Configuration file and environment overrides
//! - [`logging`] - Structured logging with JSON and pretty-print formats
//!
//! ## Main Entry Point
//!
//! ```rust
//! use sacct_eff::analyzer::{ReportAnalyzer, ReportOptions};
//! use sacct_eff::config::Config;
//! use sacct_eff::display::{parse_format, OutputRenderer, RenderOptions};
//! use sacct_eff::filter::JobSelection;
//!
//! # fn example(sacct_output: &str) -> anyhow::Result<()> {
//! let config = Config::default();
//! let valid = vec!["JobID".to_string(), "State".to_string()];
//! let specs = parse_format("JobID%>,State,CPUEff", &config.display.format)?;
//! let renderer = OutputRenderer::new(&valid, specs, RenderOptions::default());
//!
//! let analyzer = ReportAnalyzer::new(renderer, &config);
//! let options = ReportOptions {
//!     selection: JobSelection::all(),
//!     ..ReportOptions::default()
//! };
//! println!("{}", analyzer.report(sacct_output, &options).output);
//! # Ok(())
//! # }
//! ```

pub mod admin_comment;
pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod display;
pub mod efficiency;
pub mod file_discovery;
pub mod filter;
pub mod inquirer;
pub mod logging;
pub mod models;
pub mod parser;
pub mod timestamp_parser;

pub use analyzer::{Report, ReportAnalyzer, ReportOptions};
pub use models::{Job, JobKey, JobState};
