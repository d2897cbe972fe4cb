//! Job selection, filtering and ordering
//!
//! - [`JobSelection`] decides which aggregated jobs were asked for: explicit
//!   ids, ids recovered from output filenames, or everything for user and
//!   all-user queries
//! - [`JobFilter`] keeps jobs by state and time window
//! - [`sort_jobs`] orders the result by job id or by output file age

use crate::models::{Job, JobKey, JobState};
use anyhow::Result;
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Output files named like `slurm-1234.out`, `job_1234_5.out` or `name-1234`.
static DEFAULT_FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*?[_-](?P<jobid>(?P<job>[0-9]+)(?:_[0-9]+)?)(?:\.out)?$")
        .expect("output file pattern is valid")
});

/// Job ids such as `1234`, `1234_5` or `1234_[1-5]`.
static JOB_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<jobid>(?P<job>[0-9]+)(?:_[\[\]\-0-9]+)?)$").expect("job id pattern is valid")
});

/// Split a comma separated list of state codes or names.
/// Returns the recognized states and the tokens that were not.
pub fn parse_states(text: &str) -> (Vec<JobState>, Vec<String>) {
    let mut states = Vec::new();
    let mut unknown = Vec::new();
    for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match JobState::from_code_or_name(token) {
            Some(state) => {
                if !states.contains(&state) {
                    states.push(state);
                }
            }
            None => unknown.push(token.to_string()),
        }
    }
    (states, unknown)
}

/// State and time window predicate.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    include: Option<Vec<JobState>>,
    exclude: Vec<JobState>,
    since: Option<NaiveDateTime>,
    until: Option<NaiveDateTime>,
    unknown_states: Vec<String>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// An include list naming no valid state matches nothing; an exclude
    /// list naming no valid state is ignored.
    pub fn with_states(mut self, include: &str, exclude: &str) -> Self {
        if !include.trim().is_empty() {
            let (states, unknown) = parse_states(include);
            if states.is_empty() {
                warn!(states = include, "No valid states to include, nothing will match");
            }
            self.include = Some(states);
            self.unknown_states.extend(unknown);
        }

        let (states, unknown) = parse_states(exclude);
        self.exclude = states;
        self.unknown_states.extend(unknown);

        for state in &self.unknown_states {
            warn!(state = %state, "Unknown state");
        }
        self
    }

    pub fn with_window(mut self, since: Option<NaiveDateTime>, until: Option<NaiveDateTime>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn unknown_states(&self) -> &[String] {
        &self.unknown_states
    }

    pub fn matches(&self, job: &Job) -> bool {
        if let Some(include) = &self.include {
            if !include.contains(&job.state) {
                return false;
            }
        }
        if self.exclude.contains(&job.state) {
            return false;
        }
        if let (Some(since), Some(end)) = (self.since, job.end) {
            if end < since {
                return false;
            }
        }
        if let (Some(until), Some(start)) = (self.until, job.start) {
            if start > until {
                return false;
            }
        }
        true
    }

    /// Keep the matching jobs, preserving their order.
    pub fn apply(&self, mut jobs: Vec<Job>) -> Vec<Job> {
        let before = jobs.len();
        jobs.retain(|job| self.matches(job));
        debug!(before = before, after = jobs.len(), "Applied job filter");
        jobs
    }
}

#[derive(Debug, Clone)]
struct Requested {
    base: String,
    filename: Option<String>,
}

/// Which jobs the user asked to see.
#[derive(Debug, Clone)]
pub struct JobSelection {
    select_all: bool,
    requested: BTreeMap<String, Requested>,
    file_regex: Regex,
    job_regex: Regex,
}

impl Default for JobSelection {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSelection {
    pub fn new() -> Self {
        Self {
            select_all: false,
            requested: BTreeMap::new(),
            file_regex: DEFAULT_FILE_REGEX.clone(),
            job_regex: JOB_ID_REGEX.clone(),
        }
    }

    /// Select every job the query returns (user and all-user queries).
    pub fn all() -> Self {
        Self {
            select_all: true,
            ..Self::new()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.select_all && self.requested.is_empty()
    }

    pub fn add_job(&mut self, base: &str, jobid: &str, filename: Option<String>) {
        self.requested.insert(
            jobid.to_string(),
            Requested {
                base: base.to_string(),
                filename,
            },
        );
    }

    /// Add a command line argument, either a job id or an output filename.
    /// Returns false when no job id could be found in it.
    pub fn add_argument(&mut self, argument: &str) -> bool {
        if let Some(captures) = self.job_regex.captures(argument) {
            let (base, jobid) = (captures["job"].to_string(), captures["jobid"].to_string());
            self.add_job(&base, &jobid, None);
            return true;
        }
        self.process_output_file(argument)
    }

    /// Recover a job id from an output filename.
    pub fn process_output_file(&mut self, filename: &str) -> bool {
        let Some(captures) = self.file_regex.captures(filename) else {
            debug!(filename = filename, "No job id in filename");
            return false;
        };
        let (base, jobid) = (captures["job"].to_string(), captures["jobid"].to_string());
        self.add_job(&base, &jobid, Some(filename.to_string()));
        true
    }

    /// Match output files written with an sbatch `--output` pattern such as
    /// `%x.%j.log` or `out/%A_%a.txt`.
    pub fn set_custom_format(&mut self, sbatch_pattern: &str) -> Result<()> {
        let escaped = regex::escape(sbatch_pattern);
        let pattern = if escaped.contains("%j") {
            escaped.replacen("%j", "(?P<jobid>(?P<job>[0-9]+))", 1)
        } else if escaped.contains("%A_%a") {
            escaped.replacen("%A_%a", "(?P<jobid>(?P<job>[0-9]+)_[0-9]+)", 1)
        } else if escaped.contains("%A") {
            escaped.replacen("%A", "(?P<jobid>(?P<job>[0-9]+))", 1)
        } else {
            anyhow::bail!(
                "Unable to determine jobid from {}. Pattern should include one of ('%j', '%A', '%A_%a')",
                sbatch_pattern
            );
        };

        let pattern = format!("^{}$", wildcard_placeholders(&pattern));
        debug!(sbatch = sbatch_pattern, regex = %pattern, "Using custom output file pattern");
        self.file_regex = Regex::new(&pattern)
            .map_err(|e| anyhow::anyhow!("Invalid output file pattern {:?}: {}", sbatch_pattern, e))?;
        Ok(())
    }

    /// Base ids to pass to the accounting query.
    pub fn query_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.requested.values().map(|r| r.base.clone()).collect();
        ids.sort_by(|a, b| JobKey::new(a.as_str(), None).cmp(&JobKey::new(b.as_str(), None)));
        ids.dedup();
        ids
    }

    /// Keep the requested jobs, attaching output filenames.
    ///
    /// A job is kept when its id was requested, when its base id was
    /// requested (an element of a requested array), or when its raw id was
    /// requested; the latter is how an array element submitted as its own
    /// job number gets displayed under its array id.
    pub fn resolve(&self, jobs: BTreeMap<JobKey, Job>) -> Vec<Job> {
        jobs.into_values()
            .filter_map(|mut job| {
                if self.select_all {
                    return Some(job);
                }
                let filename = if let Some(requested) = self.requested.get(&job.jobid()) {
                    requested.filename.clone()
                } else if job.key.array_index.is_some()
                    && self.requested.contains_key(&job.key.base)
                {
                    None
                } else if let Some(requested) =
                    job.raw_id.as_ref().and_then(|raw| self.requested.get(raw))
                {
                    requested.filename.clone()
                } else {
                    return None;
                };
                job.filename = filename;
                Some(job)
            })
            .collect()
    }
}


/// Turn the remaining `%x` placeholders into `.*`, collapsing runs of them.
fn wildcard_placeholders(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut result = String::with_capacity(pattern.len());
    let mut last_wildcard = false;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '%' && i + 1 < chars.len() && chars[i + 1] != '%' {
            if !last_wildcard {
                result.push_str(".*");
                last_wildcard = true;
            }
            i += 2;
        } else {
            result.push(chars[i]);
            last_wildcard = false;
            i += 1;
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    JobId,
    /// Newest output file first; jobs without a file use their numeric id.
    Modified,
}

/// Order jobs in place. `mtimes` maps output filenames to modification times.
pub fn sort_jobs(jobs: &mut [Job], order: SortOrder, mtimes: &HashMap<String, SystemTime>) {
    match order {
        SortOrder::JobId => jobs.sort_by(|a, b| a.key.cmp(&b.key)),
        SortOrder::Modified => {
            let sort_key = |job: &Job| -> f64 {
                job.filename
                    .as_ref()
                    .and_then(|name| mtimes.get(name))
                    .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
                    .map(|age| age.as_secs_f64())
                    .unwrap_or_else(|| numeric_id(&job.jobid()))
            };
            jobs.sort_by(|a, b| sort_key(b).total_cmp(&sort_key(a)));
        }
    }
}

/// `1234_5` → 1234.5, for ordering jobs that have no output file.
fn numeric_id(jobid: &str) -> f64 {
    let digits: String = jobid
        .replace('_', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().unwrap_or(0.0)
}
