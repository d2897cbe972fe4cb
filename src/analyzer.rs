//! Report Pipeline
//!
//! [`ReportAnalyzer`] wires the pure stages together:
//!
//! 1. **Parsing**: raw accounting text into records ([`RecordParser`])
//! 2. **Aggregation**: one job per id and array index ([`JobAggregator`])
//! 3. **Enrichment**: CPU, memory, time and GPU efficiency ([`EfficiencyCalculator`])
//! 4. **Selection**: only the jobs that were asked for ([`JobSelection`])
//! 5. **Filtering**: by state and time window ([`JobFilter`])
//! 6. **Ordering**: by job id or output file age ([`sort_jobs`])
//! 7. **Rendering**: the table or parsable rows ([`OutputRenderer`])
//!
//! Nothing here performs I/O; the accounting text comes from
//! [`crate::inquirer`] and file times from [`crate::file_discovery`].

use crate::aggregator::JobAggregator;
use crate::config::Config;
use crate::display::OutputRenderer;
use crate::efficiency::EfficiencyCalculator;
use crate::filter::{sort_jobs, JobFilter, JobSelection, SortOrder};
use crate::models::Job;
use crate::parser::RecordParser;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::info;

/// How the selected jobs are narrowed down and ordered.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub selection: JobSelection,
    pub filter: JobFilter,
    pub sort: SortOrder,
    /// Output file modification times, keyed by the filename shown for the job.
    pub mtimes: HashMap<String, SystemTime>,
}

/// A rendered report.
#[derive(Debug, Clone)]
pub struct Report {
    pub output: String,
    pub job_count: usize,
}

pub struct ReportAnalyzer {
    renderer: OutputRenderer,
    aggregator: JobAggregator,
    calculator: EfficiencyCalculator,
    delimiter: String,
}

impl ReportAnalyzer {
    pub fn new(renderer: OutputRenderer, config: &Config) -> Self {
        Self {
            renderer,
            aggregator: JobAggregator::new(),
            calculator: EfficiencyCalculator::new(config.thresholds.cpu_tolerance),
            delimiter: config.query.delimiter.clone(),
        }
    }

    pub fn with_partition_limits(mut self, limits: HashMap<String, Duration>) -> Self {
        self.aggregator = self.aggregator.with_partition_limits(limits);
        self
    }

    pub fn renderer(&self) -> &OutputRenderer {
        &self.renderer
    }

    /// Parse, aggregate, enrich, select, filter and order the jobs in `sacct_output`.
    pub fn collect_jobs(&self, sacct_output: &str, options: &ReportOptions) -> Vec<Job> {
        let parser = RecordParser::new(self.renderer.query_columns(), self.delimiter.as_str());
        let records = parser.parse(sacct_output);

        let mut jobs = self.aggregator.aggregate(records);
        self.calculator.enrich_all(&mut jobs);

        let selected = options.selection.resolve(jobs);
        let mut jobs = options.filter.apply(selected);
        sort_jobs(&mut jobs, options.sort, &options.mtimes);
        jobs
    }

    pub fn report(&self, sacct_output: &str, options: &ReportOptions) -> Report {
        let jobs = self.collect_jobs(sacct_output, options);
        info!(jobs = jobs.len(), "Rendering report");
        Report {
            output: self.renderer.format_jobs(&jobs),
            job_count: jobs.len(),
        }
    }
}
