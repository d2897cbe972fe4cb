//! Table rendering
//!
//! Renders aggregated jobs as an aligned, optionally colored text table, or
//! as `|` separated rows for scripts.
//!
//! ## Format tokens
//!
//! Columns are requested as a comma separated list of tokens of the form
//! `TITLE[(%|:)[ALIGN][WIDTH[e|$]]]`:
//!
//! - `ALIGN` is `<` (left), `^` (center, the default) or `>` (right)
//! - `WIDTH` fixes the column width; longer text is truncated, keeping its
//!   start, or its end when followed by `e` or `$`
//! - a format string starting with `+` is appended to the default format
//!
//! Titles are any field the accounting tool knows plus the derived
//! efficiency columns (`CPUEff`, `MemEff`, `TimeEff`, `GPU`, `GPUEff`,
//! `GPUMem`, `Energy`). An unknown title does not abort the report: the
//! column is rendered empty and listed by [`OutputRenderer::unknown_columns`].
//!
//! ## Layout
//!
//! - Without an explicit width a column is as wide as its title or its widest
//!   cell, whichever is longer
//! - Colors are applied after padding, so escape codes never count towards
//!   the width
//! - A single column is printed bare: no header, no padding, no color
//! - In node mode, jobs with several nodes (or GPU data in GPU mode) are
//!   followed by one indented row per node and per GPU

use crate::config::ThresholdsConfig;
use crate::models::{FieldValue, Job, JobState};
use anyhow::{Context, Result};
use colored::{Color, Colorize};
use regex::Regex;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Columns computed from other fields, and the fields they are computed from.
pub const DERIVED_COLUMNS: [(&str, &[&str]); 7] = [
    ("CPUEff", &["TotalCPU", "AllocCPUS", "Elapsed"]),
    ("MemEff", &["REQMEM", "NNodes", "AllocCPUS", "MaxRSS", "NTasks"]),
    ("TimeEff", &["Elapsed", "Timelimit", "Partition"]),
    ("GPU", &[]),
    ("GPUMem", &[]),
    ("GPUEff", &[]),
    ("Energy", &["TRESUsageOutAve"]),
];

/// Fields every query needs for aggregation and filtering.
pub const REQUIRED_COLUMNS: [&str; 6] =
    ["JobID", "JobIDRaw", "State", "AdminComment", "Start", "End"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    Left,
    #[default]
    Center,
    Right,
}

impl Alignment {
    fn from_marker(marker: &str) -> Self {
        match marker {
            "<" => Self::Left,
            ">" => Self::Right,
            _ => Self::Center,
        }
    }

    /// Pad `text` to `width` characters; centering puts an odd extra space on the right.
    pub fn pad(self, text: &str, width: usize) -> String {
        let padding = width.saturating_sub(text.chars().count());
        let (left, right) = match self {
            Self::Left => (0, padding),
            Self::Right => (padding, 0),
            Self::Center => (padding / 2, padding - padding / 2),
        };
        format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))
    }
}

/// One requested output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub title: String,
    pub alignment: Alignment,
    pub width: Option<usize>,
    /// Truncate from the left, keeping the end of long values.
    pub keep_end: bool,
}

impl ColumnSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            alignment: Alignment::default(),
            width: None,
            keep_end: false,
        }
    }

    pub fn aligned(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }
}

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<title>[^%:]+)(?:[%:](?P<alignment>[<^>])?(?:(?P<width>\d+)(?P<end>[e$])?)?)?$")
        .expect("format token pattern is valid")
});

impl FromStr for ColumnSpec {
    type Err = anyhow::Error;

    fn from_str(token: &str) -> Result<Self> {
        let captures = TOKEN.captures(token);
        let formatted = token.contains('%') || token.contains(':');

        let captures = match captures {
            Some(c) if !formatted || c.name("alignment").is_some() || c.name("width").is_some() => c,
            _ => {
                let hint = if token.contains('%') {
                    ", did you forget to wrap in quotes?"
                } else {
                    ""
                };
                anyhow::bail!("Unable to parse format token {:?}{}", token, hint);
            }
        };

        let width = captures
            .name("width")
            .map(|w| w.as_str().parse::<usize>())
            .transpose()
            .with_context(|| format!("Invalid width in format token {:?}", token))?;

        Ok(Self {
            title: captures["title"].to_string(),
            alignment: captures
                .name("alignment")
                .map(|a| Alignment::from_marker(a.as_str()))
                .unwrap_or_default(),
            width,
            keep_end: captures.name("end").is_some(),
        })
    }
}

/// Parse a comma separated format string. A leading `+` appends to `default_format`.
pub fn parse_format(format: &str, default_format: &str) -> Result<Vec<ColumnSpec>> {
    let format = match format.strip_prefix('+') {
        Some(extra) => format!("{},{}", default_format, extra),
        None => format.to_string(),
    };

    format
        .split(',')
        .filter(|token| !token.is_empty())
        .map(ColumnSpec::from_str)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorRule {
    Plain,
    State,
    HighTarget,
    MidTarget,
}

impl ColorRule {
    fn for_title(title: &str) -> Self {
        match title.to_lowercase().as_str() {
            "state" => Self::State,
            "cpueff" | "gpueff" | "gpu" => Self::HighTarget,
            "timeeff" | "memeff" | "gpumem" => Self::MidTarget,
            _ => Self::Plain,
        }
    }
}

/// Color of a State cell.
pub fn state_color(state: &str) -> Option<Color> {
    match JobState::from_sacct(state) {
        JobState::Failed
        | JobState::Timeout
        | JobState::OutOfMemory
        | JobState::NodeFail
        | JobState::BootFail => Some(Color::Red),
        JobState::Running => Some(Color::Cyan),
        JobState::Cancelled => Some(Color::Yellow),
        JobState::Completed => Some(Color::Green),
        JobState::Pending => Some(Color::Blue),
        _ => None,
    }
}

/// Color for columns where higher is better.
pub fn high_color(value: f64, thresholds: &ThresholdsConfig) -> Option<Color> {
    if value < thresholds.high_low {
        Some(Color::Red)
    } else if value > thresholds.high_good {
        Some(Color::Green)
    } else {
        None
    }
}

/// Color for columns that should be well used but not exhausted.
pub fn mid_color(value: f64, thresholds: &ThresholdsConfig) -> Option<Color> {
    if value < thresholds.mid_low || value > thresholds.mid_high {
        Some(Color::Red)
    } else if value > thresholds.mid_good {
        Some(Color::Green)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Print a row per node beneath multi-node jobs.
    pub node: bool,
    /// Print a row per GPU as well; implies `node`.
    pub gpu: bool,
    /// `|` separated output without header, padding or color.
    pub parsable: bool,
    pub color: bool,
    pub column_gap: usize,
    pub thresholds: ThresholdsConfig,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            node: false,
            gpu: false,
            parsable: false,
            color: false,
            column_gap: 2,
            thresholds: ThresholdsConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    spec: ColumnSpec,
    rule: ColorRule,
    known: bool,
}

#[derive(Debug, Clone)]
pub struct OutputRenderer {
    columns: Vec<Column>,
    query_columns: Vec<String>,
    unknown_columns: Vec<String>,
    options: RenderOptions,
}

impl OutputRenderer {
    /// Validate `specs` against the fields the accounting tool reports.
    pub fn new(valid_titles: &[String], specs: Vec<ColumnSpec>, mut options: RenderOptions) -> Self {
        options.node |= options.gpu;

        let valid: Vec<&str> = valid_titles
            .iter()
            .map(String::as_str)
            .chain(DERIVED_COLUMNS.iter().map(|(title, _)| *title))
            .collect();

        let mut unknown_columns: Vec<String> = Vec::new();
        let mut columns: Vec<Column> = specs
            .into_iter()
            .map(|mut spec| {
                let canonical = valid
                    .iter()
                    .find(|title| title.eq_ignore_ascii_case(&spec.title));
                let known = match canonical {
                    Some(title) => {
                        spec.title = title.to_string();
                        true
                    }
                    None => {
                        if !unknown_columns.contains(&spec.title) {
                            warn!(column = %spec.title, "Unknown column, it will be rendered empty");
                            unknown_columns.push(spec.title.clone());
                        }
                        false
                    }
                };
                Column {
                    rule: ColorRule::for_title(&spec.title),
                    spec,
                    known,
                }
            })
            .collect();

        let query_columns = Self::expand_query_columns(&columns);

        if options.node {
            match columns
                .iter()
                .position(|c| c.spec.title.eq_ignore_ascii_case("JobID"))
            {
                Some(index) => columns[index].spec.alignment = Alignment::Left,
                None => columns.insert(
                    0,
                    Self::column(ColumnSpec::new("JobID").aligned(Alignment::Left)),
                ),
            }
        }

        if let Some(index) = columns.iter().position(|c| c.known && c.spec.title == "GPU") {
            columns[index].spec.title = "GPUEff".to_string();
            let mut gpu_mem = columns[index].clone();
            gpu_mem.spec.title = "GPUMem".to_string();
            gpu_mem.rule = ColorRule::MidTarget;
            columns.insert(index + 1, gpu_mem);
        }

        if options.gpu
            && !columns
                .iter()
                .any(|c| c.spec.title == "GPUEff" || c.spec.title == "GPUMem")
        {
            columns.push(Self::column(ColumnSpec::new("GPUEff")));
            columns.push(Self::column(ColumnSpec::new("GPUMem")));
        }

        debug!(
            columns = ?columns.iter().map(|c| c.spec.title.as_str()).collect::<Vec<_>>(),
            query = ?query_columns,
            "Built output renderer"
        );

        Self {
            columns,
            query_columns,
            unknown_columns,
            options,
        }
    }

    fn column(spec: ColumnSpec) -> Column {
        Column {
            rule: ColorRule::for_title(&spec.title),
            spec,
            known: true,
        }
    }

    fn expand_query_columns(columns: &[Column]) -> Vec<String> {
        let mut query: BTreeSet<String> = BTreeSet::new();
        for column in columns.iter().filter(|c| c.known) {
            match DERIVED_COLUMNS
                .iter()
                .find(|(title, _)| *title == column.spec.title)
            {
                Some((_, inputs)) => query.extend(inputs.iter().map(|s| s.to_string())),
                None => {
                    query.insert(column.spec.title.clone());
                }
            }
        }
        query.extend(REQUIRED_COLUMNS.iter().map(|s| s.to_string()));
        query.into_iter().collect()
    }

    /// Fields to request from the accounting tool, in the order they are requested.
    pub fn query_columns(&self) -> &[String] {
        &self.query_columns
    }

    /// Requested titles that are not known fields.
    pub fn unknown_columns(&self) -> &[String] {
        &self.unknown_columns
    }

    /// Titles of the rendered columns, after node and GPU adjustments.
    pub fn titles(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.spec.title.as_str()).collect()
    }

    pub fn format_jobs(&self, jobs: &[Job]) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        let bare = self.options.parsable || self.columns.len() == 1;

        let rows: Vec<Vec<FieldValue>> = jobs.iter().flat_map(|job| self.job_rows(job)).collect();
        let texts: Vec<Vec<String>> = rows
            .iter()
            .map(|row| row.iter().map(|value| cell_text(value, bare)).collect())
            .collect();

        if bare {
            let delimiter = if self.options.parsable { "|" } else { "" };
            return texts
                .iter()
                .map(|row| row.join(delimiter).trim_end().to_string())
                .collect::<Vec<_>>()
                .join("\n");
        }

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                column.spec.width.unwrap_or_else(|| {
                    texts
                        .iter()
                        .map(|row| row[i].chars().count())
                        .chain(std::iter::once(column.spec.title.chars().count()))
                        .max()
                        .unwrap_or(0)
                })
            })
            .collect();

        let gap = " ".repeat(self.options.column_gap);
        let mut lines = Vec::with_capacity(texts.len() + 1);

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(column, width)| {
                let cell = fit(&column.spec, &column.spec.title, *width);
                if self.options.color {
                    cell.bold().to_string()
                } else {
                    cell
                }
            })
            .collect();
        lines.push(header.join(&gap).trim_end().to_string());

        for (row, text) in rows.iter().zip(&texts) {
            let cells: Vec<String> = self
                .columns
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (column, width))| {
                    let cell = fit(&column.spec, &text[i], *width);
                    match self.cell_color(column.rule, &row[i], &text[i]) {
                        Some(color) => cell.color(color).to_string(),
                        None => cell,
                    }
                })
                .collect();
            lines.push(cells.join(&gap).trim_end().to_string());
        }

        lines.join("\n")
    }

    /// The job row followed by its node and GPU rows, one value per column.
    fn job_rows(&self, job: &Job) -> Vec<Vec<FieldValue>> {
        let per_column: Vec<Vec<FieldValue>> = self
            .columns
            .iter()
            .map(|column| {
                if !column.known {
                    let count = if self.options.node {
                        job.get_node_entries("JobID", self.options.gpu).len()
                    } else {
                        1
                    };
                    return vec![FieldValue::blank(); count];
                }
                if self.options.node {
                    job.get_node_entries(&column.spec.title, self.options.gpu)
                } else {
                    vec![job.get_entry(&column.spec.title)]
                }
            })
            .collect();

        let row_count = per_column.first().map(Vec::len).unwrap_or(0);
        (0..row_count)
            .map(|r| per_column.iter().map(|values| values[r].clone()).collect())
            .collect()
    }

    fn cell_color(&self, rule: ColorRule, value: &FieldValue, text: &str) -> Option<Color> {
        if !self.options.color {
            return None;
        }
        let thresholds = &self.options.thresholds;
        match rule {
            ColorRule::Plain => None,
            ColorRule::State => state_color(text),
            ColorRule::HighTarget => value.as_percent().and_then(|v| high_color(v, thresholds)),
            ColorRule::MidTarget => value.as_percent().and_then(|v| mid_color(v, thresholds)),
        }
    }
}

/// Percentages carry a `%` in the table but are bare numbers in scripted output.
fn cell_text(value: &FieldValue, bare: bool) -> String {
    match value {
        FieldValue::Percent(percent) if bare => format!("{:.1}", percent),
        other => other.to_string(),
    }
}

/// Truncate to an explicit width, then pad.
fn fit(spec: &ColumnSpec, text: &str, width: usize) -> String {
    let length = text.chars().count();
    let text: String = match spec.width {
        Some(limit) if length > limit && spec.keep_end => text.chars().skip(length - limit).collect(),
        Some(limit) if length > limit => text.chars().take(limit).collect(),
        _ => text.to_string(),
    };
    spec.alignment.pad(&text, width)
}
