//! Core Data Models
//!
//! This module defines the data structures that flow through the efficiency
//! reporting pipeline, from raw accounting rows to the displayable job rows.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`RawRecord`] - one parsed row of `sacct` output
//! 2. **Aggregation**: [`Job`] - one logical job per [`JobKey`], folded from the
//!    primary record and its steps
//! 3. **Projection**: [`FieldValue`] - a tagged cell value looked up by column
//!    name from the job's column dictionary
//!
//! ## Core Types
//!
//! - [`JobId`] - a `BASE[_INDEX][.STEP]` identifier split into its parts
//! - [`JobKey`] - the identity of a displayable job (base id + array index)
//! - [`JobState`] - accounting states, with a passthrough for unknown ones
//! - [`NodeEntry`] / [`GpuEntry`] - per-node and per-GPU efficiency from jobstats

use crate::parser::format_duration;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Placeholder rendered for values that are undefined or not final.
pub const NULL_PLACEHOLDER: &str = "---";

/// A job identifier decomposed from `BASE[_INDEX][.STEP]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub base: String,
    pub array_index: Option<String>,
    pub step: Option<String>,
}

impl JobId {
    pub fn key(&self) -> JobKey {
        JobKey {
            base: self.base.clone(),
            array_index: self.array_index.clone(),
        }
    }

    pub fn is_step(&self) -> bool {
        self.step.is_some()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())?;
        if let Some(step) = &self.step {
            write!(f, ".{}", step)?;
        }
        Ok(())
    }
}

/// Identity of an aggregated job: base id plus optional array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub base: String,
    pub array_index: Option<String>,
}

impl JobKey {
    pub fn new(base: impl Into<String>, array_index: Option<&str>) -> Self {
        Self {
            base: base.into(),
            array_index: array_index.map(str::to_string),
        }
    }

    /// The id as printed by the accounting tool, e.g. `24220929_421`.
    pub fn jobid(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.array_index {
            Some(index) => write!(f, "{}_{}", self.base, index),
            None => write!(f, "{}", self.base),
        }
    }
}

impl Ord for JobKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_numeric(&self.base, &other.base).then_with(|| {
            match (&self.array_index, &other.array_index) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => compare_numeric(a, b),
            }
        })
    }
}

impl PartialOrd for JobKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders digit strings by value, everything else lexically after them.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a_digits = !a.is_empty() && a.bytes().all(|c| c.is_ascii_digit());
    let b_digits = !b.is_empty() && b.bytes().all(|c| c.is_ascii_digit());
    match (a_digits, b_digits) {
        (true, true) => {
            let a = a.trim_start_matches('0');
            let b = b.trim_start_matches('0');
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

/// Slurm job states. Unknown states are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    BootFail,
    Cancelled,
    Completed,
    Deadline,
    Failed,
    NodeFail,
    OutOfMemory,
    Pending,
    Preempted,
    Running,
    Requeued,
    Resizing,
    Revoked,
    Suspended,
    Timeout,
    Other(String),
}

/// Short codes accepted on the command line and their full state names.
pub const STATE_CODES: [(&str, &str); 15] = [
    ("BF", "BOOT_FAIL"),
    ("CA", "CANCELLED"),
    ("CD", "COMPLETED"),
    ("DL", "DEADLINE"),
    ("F", "FAILED"),
    ("NF", "NODE_FAIL"),
    ("OOM", "OUT_OF_MEMORY"),
    ("PD", "PENDING"),
    ("PR", "PREEMPTED"),
    ("R", "RUNNING"),
    ("RQ", "REQUEUED"),
    ("RS", "RESIZING"),
    ("RV", "REVOKED"),
    ("S", "SUSPENDED"),
    ("TO", "TIMEOUT"),
];

impl JobState {
    /// Parse the State column; only the first word counts (`CANCELLED by 42`).
    pub fn from_sacct(text: &str) -> Self {
        let word = text.split_whitespace().next().unwrap_or("").to_uppercase();
        match word.as_str() {
            "BOOT_FAIL" => Self::BootFail,
            "CANCELLED" => Self::Cancelled,
            "COMPLETED" => Self::Completed,
            "DEADLINE" => Self::Deadline,
            "FAILED" => Self::Failed,
            "NODE_FAIL" => Self::NodeFail,
            "OUT_OF_MEMORY" => Self::OutOfMemory,
            "PENDING" => Self::Pending,
            "PREEMPTED" => Self::Preempted,
            "RUNNING" => Self::Running,
            "REQUEUED" => Self::Requeued,
            "RESIZING" => Self::Resizing,
            "REVOKED" => Self::Revoked,
            "SUSPENDED" => Self::Suspended,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Other(word),
        }
    }

    /// Resolve a user supplied code (`TO`) or name (`timeout`).
    pub fn from_code_or_name(token: &str) -> Option<Self> {
        let upper = token.trim().to_uppercase();
        let name = STATE_CODES
            .iter()
            .find(|(code, _)| *code == upper)
            .map(|(_, name)| (*name).to_string())
            .unwrap_or(upper);
        match Self::from_sacct(&name) {
            Self::Other(_) => None,
            state => Some(state),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::BootFail => "BOOT_FAIL",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
            Self::Deadline => "DEADLINE",
            Self::Failed => "FAILED",
            Self::NodeFail => "NODE_FAIL",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::Pending => "PENDING",
            Self::Preempted => "PREEMPTED",
            Self::Running => "RUNNING",
            Self::Requeued => "REQUEUED",
            Self::Resizing => "RESIZING",
            Self::Revoked => "REVOKED",
            Self::Suspended => "SUSPENDED",
            Self::Timeout => "TIMEOUT",
            Self::Other(name) => name,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// States where no usage has been measured yet.
    pub fn is_pre_execution(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cell value in a job's column dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Number(f64),
    Percent(f64),
    Duration(Duration),
}

impl FieldValue {
    pub fn blank() -> Self {
        Self::Text(String::new())
    }

    pub fn as_percent(&self) -> Option<f64> {
        match self {
            Self::Percent(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(percent: Option<f64>) -> Self {
        percent.map(Self::Percent).unwrap_or(Self::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_PLACEHOLDER),
            Self::Text(text) => f.write_str(text),
            Self::Number(value) if value.fract() == 0.0 && value.is_finite() => {
                write!(f, "{}", *value as i64)
            }
            Self::Number(value) => write!(f, "{}", value),
            Self::Percent(value) => write!(f, "{:.1}%", value),
            Self::Duration(duration) => f.write_str(&format_duration(*duration)),
        }
    }
}

/// One parsed accounting row.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Position of the row in the accounting output.
    pub ordinal: usize,
    pub job_id: JobId,
    pub job_id_raw: Option<JobId>,
    pub state: Option<JobState>,
    pub elapsed: Option<Duration>,
    pub total_cpu: Option<Duration>,
    pub timelimit: Option<String>,
    /// Requested memory in bytes, already scaled by nodes or cpus.
    pub req_mem: Option<f64>,
    /// Peak resident memory of one task, in bytes.
    pub max_rss: Option<f64>,
    pub alloc_cpus: Option<u32>,
    pub nnodes: Option<u32>,
    pub ntasks: Option<u32>,
    pub partition: Option<String>,
    pub admin_comment: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub energy: Option<u64>,
    /// Every raw field keyed by lowercase column name.
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(ordinal: usize, job_id: JobId) -> Self {
        Self {
            ordinal,
            job_id,
            job_id_raw: None,
            state: None,
            elapsed: None,
            total_cpu: None,
            timelimit: None,
            req_mem: None,
            max_rss: None,
            alloc_cpus: None,
            nnodes: None,
            ntasks: None,
            partition: None,
            admin_comment: None,
            start: None,
            end: None,
            energy: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn is_step(&self) -> bool {
        self.job_id.is_step()
    }

    /// Memory used across all tasks of this record.
    pub fn memory_used(&self) -> Option<f64> {
        self.max_rss
            .map(|rss| rss * f64::from(self.ntasks.unwrap_or(1).max(1)))
    }
}

/// Per-GPU efficiency decoded from a jobstats comment.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuEntry {
    pub name: String,
    pub gpu_eff: f64,
    pub gpu_mem: f64,
}

/// Per-node efficiency decoded from a jobstats comment.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub name: String,
    pub cpu_eff: f64,
    pub mem_eff: f64,
    pub gpu_eff: Option<f64>,
    pub gpu_mem: Option<f64>,
    pub gpus: Vec<GpuEntry>,
}

/// The aggregated, displayable unit: one per [`JobKey`].
#[derive(Debug, Clone)]
pub struct Job {
    pub key: JobKey,
    /// Base of `JobIDRaw`, used to match array elements requested by raw id.
    pub raw_id: Option<String>,
    /// Output file this job was selected through, shown instead of the id.
    pub filename: Option<String>,
    pub state: JobState,
    pub elapsed: Option<Duration>,
    pub total_cpu: Option<Duration>,
    pub alloc_cpus: Option<u32>,
    pub timelimit: Option<Duration>,
    pub req_mem: Option<f64>,
    pub max_mem: Option<f64>,
    pub energy: u64,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub cpu_eff: Option<f64>,
    pub mem_eff: Option<f64>,
    pub time_eff: Option<f64>,
    pub gpu_eff: Option<f64>,
    pub gpu_mem: Option<f64>,
    pub nodes: Vec<NodeEntry>,
    /// Columns keyed by lowercase name; passthrough and derived fields alike.
    pub columns: BTreeMap<String, FieldValue>,
}

impl Job {
    pub fn new(key: JobKey, state: JobState) -> Self {
        Self {
            key,
            raw_id: None,
            filename: None,
            state,
            elapsed: None,
            total_cpu: None,
            alloc_cpus: None,
            timelimit: None,
            req_mem: None,
            max_mem: None,
            energy: 0,
            start: None,
            end: None,
            cpu_eff: None,
            mem_eff: None,
            time_eff: None,
            gpu_eff: None,
            gpu_mem: None,
            nodes: Vec::new(),
            columns: BTreeMap::new(),
        }
    }

    pub fn jobid(&self) -> String {
        self.key.jobid()
    }

    /// The filename if the job was selected through one, else the job id.
    pub fn name(&self) -> String {
        self.filename.clone().unwrap_or_else(|| self.jobid())
    }

    /// Look up a column value by (case-insensitive) title.
    pub fn get_entry(&self, title: &str) -> FieldValue {
        let key = title.to_lowercase();
        match key.as_str() {
            "jobid" => FieldValue::Text(self.name()),
            "state" => FieldValue::Text(self.state.to_string()),
            _ => self.columns.get(&key).cloned().unwrap_or(FieldValue::Null),
        }
    }

    /// Whether node (and GPU) rows should be printed beneath the job row.
    pub fn expands_nodes(&self, gpu: bool) -> bool {
        self.nodes.len() > 1 || (gpu && self.gpu_eff.is_some())
    }

    /// The job value followed by one value per node row (and GPU row).
    pub fn get_node_entries(&self, title: &str, gpu: bool) -> Vec<FieldValue> {
        let mut entries = vec![self.get_entry(title)];
        if !self.expands_nodes(gpu) {
            return entries;
        }

        let key = title.to_lowercase();
        for node in &self.nodes {
            entries.push(match key.as_str() {
                "jobid" => FieldValue::Text(format!("  {}", node.name)),
                "cpueff" => FieldValue::Percent(node.cpu_eff),
                "memeff" => FieldValue::Percent(node.mem_eff),
                "gpueff" => node.gpu_eff.map(FieldValue::Percent).unwrap_or_else(FieldValue::blank),
                "gpumem" => node.gpu_mem.map(FieldValue::Percent).unwrap_or_else(FieldValue::blank),
                _ => FieldValue::blank(),
            });

            if gpu && self.gpu_eff.is_some() {
                for device in &node.gpus {
                    entries.push(match key.as_str() {
                        "jobid" => FieldValue::Text(format!("    {}", device.name)),
                        "gpueff" => FieldValue::Percent(device.gpu_eff),
                        "gpumem" => FieldValue::Percent(device.gpu_mem),
                        _ => FieldValue::blank(),
                    });
                }
            }
        }
        entries
    }
}

/// Round to one decimal place, the precision every percentage is shown with.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
