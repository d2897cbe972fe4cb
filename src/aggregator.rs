//! Job Aggregation Engine
//!
//! Folds the flat list of accounting rows into one [`Job`] per
//! [`JobKey`]. A job is usually reported as a primary row plus a row per
//! step (`.batch`, `.extern`, `.0`, ...), and the steps often carry usage the
//! primary row does not.
//!
//! ## Folding rules
//!
//! - Rows are bucketed by key first, so the result does not depend on the
//!   order sacct printed them in
//! - Duplicate primary rows (requeued or resubmitted jobs) resolve to the one
//!   with the latest end time, then the one printed last
//! - A job whose primary row is missing is rebuilt from its best step rather
//!   than dropped
//! - Peak memory is the maximum over the primary row and all steps
//! - Allocation fields (CPUs, nodes, requested memory) come from the primary
//!   row when there is one
//! - Jobstats admin comments are decoded into per-node entries; a comment that
//!   cannot be decoded leaves the node list empty

use crate::admin_comment;
use crate::models::{FieldValue, Job, JobKey, JobState, RawRecord};
use crate::parser::parse_duration;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Timelimit text meaning "whatever the partition allows".
const PARTITION_LIMIT: &str = "Partition_Limit";

#[derive(Debug, Default)]
pub struct JobAggregator {
    partition_limits: HashMap<String, Duration>,
}

impl JobAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `Partition_Limit` time limits through a partition → MaxTime table.
    pub fn with_partition_limits(mut self, limits: HashMap<String, Duration>) -> Self {
        self.partition_limits = limits;
        self
    }

    pub fn aggregate(&self, records: Vec<RawRecord>) -> BTreeMap<JobKey, Job> {
        let total_records = records.len();
        let mut buckets: BTreeMap<JobKey, Vec<RawRecord>> = BTreeMap::new();
        for record in records {
            buckets.entry(record.job_id.key()).or_default().push(record);
        }

        let jobs: BTreeMap<JobKey, Job> = buckets
            .into_iter()
            .map(|(key, bucket)| {
                let job = self.fold(key.clone(), bucket);
                (key, job)
            })
            .collect();

        debug!(
            records = total_records,
            jobs = jobs.len(),
            "Aggregated accounting records"
        );
        jobs
    }

    fn fold(&self, key: JobKey, mut bucket: Vec<RawRecord>) -> Job {
        bucket.sort_by_key(|record| record.ordinal);

        let primary = bucket
            .iter()
            .filter(|record| !record.is_step())
            // No end time means the attempt is still going and is the latest
            .max_by_key(|record| (record.end.is_none(), record.end, record.ordinal));
        let steps: Vec<&RawRecord> = bucket.iter().filter(|record| record.is_step()).collect();

        let source = match primary {
            Some(primary) => primary,
            None => {
                // Non-empty bucket without a primary always has a step
                let Some(step) = best_step(&steps) else {
                    return Job::new(key, JobState::Other("UNKNOWN".to_string()));
                };
                debug!(job = %key, step = %step.job_id, "Primary record missing, using step");
                step
            }
        };

        let state = source
            .state
            .clone()
            .unwrap_or_else(|| JobState::Other("UNKNOWN".to_string()));
        let mut job = Job::new(key, state);

        job.raw_id = source.job_id_raw.as_ref().map(|raw| raw.base.clone());
        job.elapsed = source.elapsed;
        job.total_cpu = source.total_cpu;
        job.alloc_cpus = source.alloc_cpus;
        job.req_mem = source.req_mem;
        job.start = source.start;
        job.end = source.end;
        job.timelimit = self.resolve_timelimit(source);

        job.max_mem = bucket
            .iter()
            .filter_map(RawRecord::memory_used)
            .fold(None, |max: Option<f64>, used| {
                Some(max.map_or(used, |max| max.max(used)))
            });
        job.energy = bucket
            .iter()
            .filter_map(|record| record.energy)
            .max()
            .unwrap_or(0);

        job.columns = passthrough_columns(source, &bucket);
        if let Some(elapsed) = job.elapsed {
            job.columns
                .insert("elapsed".to_string(), FieldValue::Duration(elapsed));
        }
        if let Some(total_cpu) = job.total_cpu {
            job.columns
                .insert("totalcpu".to_string(), FieldValue::Duration(total_cpu));
        }
        job.columns.insert(
            "state".to_string(),
            FieldValue::Text(job.state.to_string()),
        );

        if !job.state.is_running() && !job.state.is_pre_execution() {
            if let Some(comment) = &source.admin_comment {
                match admin_comment::decode(comment) {
                    Ok(Some(stats)) => job.nodes = stats.node_entries(),
                    Ok(None) => {}
                    Err(e) => debug!(job = %job.key, error = %e, "Ignoring admin comment"),
                }
            }
        }

        job
    }

    fn resolve_timelimit(&self, record: &RawRecord) -> Option<Duration> {
        let text = record.timelimit.as_deref()?;
        if text == PARTITION_LIMIT {
            let partition = record.partition.as_deref()?;
            return self.partition_limits.get(partition).copied();
        }
        parse_duration(text)
    }
}

/// The step that best stands in for a missing primary row: `batch`, else the
/// longest running step, else the last one printed.
fn best_step<'a>(steps: &[&'a RawRecord]) -> Option<&'a RawRecord> {
    if let Some(batch) = steps
        .iter()
        .find(|step| step.job_id.step.as_deref() == Some("batch"))
    {
        return Some(*batch);
    }
    steps
        .iter()
        .copied()
        .max_by_key(|step| (step.elapsed.unwrap_or_default(), step.ordinal))
}

/// Raw fields of the source row, with empty values filled from the other rows
/// in the order they were printed.
fn passthrough_columns(source: &RawRecord, bucket: &[RawRecord]) -> BTreeMap<String, FieldValue> {
    let mut columns: BTreeMap<String, FieldValue> = source
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), FieldValue::Text(value.clone())))
        .collect();

    for record in bucket.iter().filter(|r| r.ordinal != source.ordinal) {
        for (name, value) in &record.fields {
            if value.is_empty() {
                continue;
            }
            let slot = columns.entry(name.clone()).or_insert_with(FieldValue::blank);
            if slot.is_empty() {
                *slot = FieldValue::Text(value.clone());
            }
        }
    }
    columns
}
