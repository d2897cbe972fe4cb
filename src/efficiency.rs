//! Efficiency calculation
//!
//! Derives CPU, memory, wall time and GPU efficiency for aggregated jobs and
//! stores them in each job's column dictionary under `cpueff`, `memeff`,
//! `timeeff`, `gpueff`, `gpumem` and `energy`.
//!
//! Usage of RUNNING jobs is not final, so their CPU and memory columns stay
//! null; only the wall time ratio is shown. PENDING jobs have no usage at all.

use crate::models::{round1, FieldValue, Job, JobKey};
use std::collections::BTreeMap;
use std::time::Duration;

/// CPU usage above 100% (by measurement granularity) is tolerated up to this factor.
pub const DEFAULT_CPU_TOLERANCE: f64 = 1.05;

#[derive(Debug, Clone)]
pub struct EfficiencyCalculator {
    cpu_tolerance: f64,
}

impl Default for EfficiencyCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_TOLERANCE)
    }
}

impl EfficiencyCalculator {
    pub fn new(cpu_tolerance: f64) -> Self {
        Self {
            cpu_tolerance: cpu_tolerance.max(1.0),
        }
    }

    pub fn enrich_all(&self, jobs: &mut BTreeMap<JobKey, Job>) {
        for job in jobs.values_mut() {
            self.enrich(job);
        }
    }

    pub fn enrich(&self, job: &mut Job) {
        job.cpu_eff = None;
        job.mem_eff = None;
        job.gpu_eff = None;
        job.gpu_mem = None;
        job.time_eff = None;

        if !job.state.is_pre_execution() {
            job.time_eff = time_efficiency(job.elapsed, job.timelimit);
        }

        if !job.state.is_running() && !job.state.is_pre_execution() {
            if job.nodes.is_empty() {
                job.cpu_eff = self.cpu_efficiency(job.total_cpu, job.alloc_cpus, job.elapsed);
                job.mem_eff = memory_efficiency(job.max_mem, job.req_mem);
            } else {
                self.apply_node_averages(job);
            }
        }

        let columns = [
            ("cpueff", job.cpu_eff),
            ("memeff", job.mem_eff),
            ("timeeff", job.time_eff),
            ("gpueff", job.gpu_eff),
            ("gpumem", job.gpu_mem),
        ];
        for (name, value) in columns {
            job.columns.insert(name.to_string(), FieldValue::from(value));
        }
        job.columns
            .insert("energy".to_string(), FieldValue::Number(job.energy as f64));
    }

    /// Jobstats averages: every node counts in the denominator, including
    /// nodes that report no GPU.
    fn apply_node_averages(&self, job: &mut Job) {
        let count = job.nodes.len() as f64;
        let average = |values: Vec<f64>| round1(values.iter().sum::<f64>() / count);

        job.cpu_eff = Some(average(job.nodes.iter().map(|n| n.cpu_eff).collect()));
        job.mem_eff = Some(average(job.nodes.iter().map(|n| n.mem_eff).collect()));

        let gpu_eff: Vec<f64> = job.nodes.iter().filter_map(|n| n.gpu_eff).collect();
        let gpu_mem: Vec<f64> = job.nodes.iter().filter_map(|n| n.gpu_mem).collect();
        if !gpu_eff.is_empty() {
            job.gpu_eff = Some(average(gpu_eff));
            job.gpu_mem = Some(average(gpu_mem));
        }
    }

    /// CPU time over allocated core time, in percent.
    pub fn cpu_efficiency(
        &self,
        total_cpu: Option<Duration>,
        alloc_cpus: Option<u32>,
        elapsed: Option<Duration>,
    ) -> Option<f64> {
        let total_cpu = total_cpu?.as_secs_f64();
        let core_time = f64::from(alloc_cpus?) * elapsed?.as_secs_f64();
        if core_time <= 0.0 {
            return None;
        }

        let percent = round1(total_cpu / core_time * 100.0).max(0.0);
        let ceiling = round1(100.0 * self.cpu_tolerance);
        if percent > 100.0 && percent <= ceiling {
            Some(100.0)
        } else {
            Some(percent.min(ceiling))
        }
    }
}

/// Peak memory over requested memory, in percent. Null when nothing was requested.
pub fn memory_efficiency(max_mem: Option<f64>, req_mem: Option<f64>) -> Option<f64> {
    let req_mem = req_mem?;
    if req_mem <= 0.0 {
        return None;
    }
    Some(round1(max_mem.unwrap_or(0.0) / req_mem * 100.0))
}

/// Elapsed over the time limit, in percent.
pub fn time_efficiency(elapsed: Option<Duration>, timelimit: Option<Duration>) -> Option<f64> {
    let limit = timelimit?.as_secs_f64();
    if limit <= 0.0 {
        return None;
    }
    Some(round1(elapsed?.as_secs_f64() / limit * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobState, NodeEntry};

    fn secs(s: u64) -> Option<Duration> {
        Some(Duration::from_secs(s))
    }

    fn node(cpu: f64, mem: f64, gpu: Option<(f64, f64)>) -> NodeEntry {
        NodeEntry {
            name: "n".to_string(),
            cpu_eff: cpu,
            mem_eff: mem,
            gpu_eff: gpu.map(|g| g.0),
            gpu_mem: gpu.map(|g| g.1),
            gpus: Vec::new(),
        }
    }

    fn completed_job() -> Job {
        let mut job = Job::new(JobKey::new("1", None), JobState::Completed);
        job.total_cpu = secs(5249);
        job.alloc_cpus = Some(1);
        job.elapsed = secs(5262);
        job.max_mem = Some(499092.0 * 1024.0);
        job.req_mem = Some(1024f64.powi(3));
        job
    }

    #[test]
    fn test_cpu_efficiency() {
        let calc = EfficiencyCalculator::default();
        assert_eq!(calc.cpu_efficiency(secs(5249), Some(1), secs(5262)), Some(99.8));
        assert_eq!(calc.cpu_efficiency(secs(50), Some(2), secs(100)), Some(25.0));
        assert_eq!(calc.cpu_efficiency(secs(50), Some(2), secs(0)), None);
        assert_eq!(calc.cpu_efficiency(None, Some(2), secs(10)), None);
    }

    #[test]
    fn test_cpu_efficiency_clamps_granularity_overshoot() {
        let calc = EfficiencyCalculator::default();
        assert_eq!(calc.cpu_efficiency(secs(103), Some(1), secs(100)), Some(100.0));
        assert_eq!(calc.cpu_efficiency(secs(300), Some(1), secs(100)), Some(105.0));
    }

    #[test]
    fn test_memory_efficiency_null_without_request() {
        assert_eq!(memory_efficiency(Some(100.0), Some(0.0)), None);
        assert_eq!(memory_efficiency(Some(100.0), None), None);
        assert_eq!(memory_efficiency(None, Some(100.0)), Some(0.0));
        assert_eq!(memory_efficiency(Some(45.7), Some(100.0)), Some(45.7));
    }

    #[test]
    fn test_time_efficiency() {
        assert_eq!(time_efficiency(secs(1800), secs(3600)), Some(50.0));
        assert_eq!(time_efficiency(secs(1800), None), None);
        assert_eq!(time_efficiency(secs(1800), secs(0)), None);
    }

    #[test]
    fn test_enrich_completed_job() {
        let mut job = completed_job();
        EfficiencyCalculator::default().enrich(&mut job);
        assert_eq!(job.cpu_eff, Some(99.8));
        assert_eq!(job.mem_eff, Some(47.6));
        assert_eq!(job.get_entry("CPUEff"), FieldValue::Percent(99.8));
        assert_eq!(job.get_entry("TimeEff"), FieldValue::Null);
        assert_eq!(job.get_entry("Energy"), FieldValue::Number(0.0));
    }

    #[test]
    fn test_running_job_has_null_usage() {
        let mut job = completed_job();
        job.state = JobState::Running;
        job.timelimit = secs(10524);
        EfficiencyCalculator::default().enrich(&mut job);
        assert_eq!(job.get_entry("CPUEff"), FieldValue::Null);
        assert_eq!(job.get_entry("MemEff"), FieldValue::Null);
        assert_eq!(job.get_entry("TimeEff"), FieldValue::Percent(50.0));
    }

    #[test]
    fn test_pending_job_has_no_values() {
        let mut job = completed_job();
        job.state = JobState::Pending;
        job.timelimit = secs(10524);
        EfficiencyCalculator::default().enrich(&mut job);
        for column in ["CPUEff", "MemEff", "TimeEff", "GPUEff", "GPUMem"] {
            assert_eq!(job.get_entry(column), FieldValue::Null, "{}", column);
        }
    }

    #[test]
    fn test_node_averages_override_counters() {
        let mut job = completed_job();
        job.nodes = vec![
            node(18.56, 4.5, None),
            node(0.0, 0.0, None),
            node(0.0, 0.0, None),
            node(0.0, 0.0, None),
        ];
        EfficiencyCalculator::default().enrich(&mut job);
        assert_eq!(job.cpu_eff, Some(4.6));
        assert_eq!(job.mem_eff, Some(1.1));
        assert_eq!(job.gpu_eff, None);
    }

    #[test]
    fn test_gpu_averages_count_every_node() {
        let mut job = completed_job();
        job.nodes = vec![node(50.0, 10.0, Some((30.0, 90.0))), node(50.0, 10.0, None)];
        EfficiencyCalculator::default().enrich(&mut job);
        assert_eq!(job.gpu_eff, Some(15.0));
        assert_eq!(job.gpu_mem, Some(45.0));
    }
}
