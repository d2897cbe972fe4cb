#![allow(dead_code)]

use base64ct::{Base64, Encoding};
use flate2::write::GzEncoder;
use flate2::Compression;
use sacct_eff::analyzer::{ReportAnalyzer, ReportOptions};
use sacct_eff::config::Config;
use sacct_eff::display::{parse_format, OutputRenderer, RenderOptions};
use sacct_eff::filter::JobSelection;
use std::io::Write;

pub const DELIMITER: &str = "^|^";

/// Fields a typical `sacct --helpformat` lists.
pub const SACCT_FIELDS: [&str; 20] = [
    "AdminComment",
    "AllocCPUS",
    "Cluster",
    "Elapsed",
    "End",
    "JobID",
    "JobIDRaw",
    "JobName",
    "MaxRSS",
    "NNodes",
    "NodeList",
    "NTasks",
    "Partition",
    "REQMEM",
    "Start",
    "State",
    "Timelimit",
    "TotalCPU",
    "TRESUsageOutAve",
    "User",
];

pub fn sacct_fields() -> Vec<String> {
    SACCT_FIELDS.iter().map(|s| s.to_string()).collect()
}

pub fn renderer(format: &str, options: RenderOptions) -> OutputRenderer {
    OutputRenderer::new(
        &sacct_fields(),
        parse_format(format, &Config::default().display.format).unwrap(),
        options,
    )
}

pub fn analyzer(format: &str, options: RenderOptions) -> ReportAnalyzer {
    ReportAnalyzer::new(renderer(format, options), &Config::default())
}

pub fn select_all() -> ReportOptions {
    ReportOptions {
        selection: JobSelection::all(),
        ..ReportOptions::default()
    }
}

pub fn select(args: &[&str]) -> ReportOptions {
    let mut selection = JobSelection::new();
    for arg in args {
        assert!(selection.add_argument(arg), "no job id in {}", arg);
    }
    ReportOptions {
        selection,
        ..ReportOptions::default()
    }
}

/// Render one sacct row in the order `columns` were queried; fields not
/// named in `values` are empty.
pub fn sacct_row(columns: &[String], values: &[(&str, &str)]) -> String {
    let fields: Vec<&str> = columns
        .iter()
        .map(|column| {
            values
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, value)| *value)
                .unwrap_or("")
        })
        .collect();
    format!("{}{}\n", fields.join(DELIMITER), DELIMITER)
}

pub fn sacct_rows(columns: &[String], rows: &[&[(&str, &str)]]) -> String {
    rows.iter().map(|values| sacct_row(columns, values)).collect()
}

/// A finished single-node job with a batch and an extern step.
pub fn completed_job(columns: &[String]) -> String {
    sacct_rows(
        columns,
        &[
            &[
                ("JobID", "24418435"),
                ("JobIDRaw", "24418435"),
                ("State", "COMPLETED"),
                ("AllocCPUS", "1"),
                ("REQMEM", "1Gn"),
                ("NNodes", "1"),
                ("TotalCPU", "01:27:29"),
                ("Elapsed", "01:27:42"),
                ("Timelimit", "03:00:00"),
            ],
            &[
                ("JobID", "24418435.batch"),
                ("JobIDRaw", "24418435.batch"),
                ("State", "COMPLETED"),
                ("AllocCPUS", "1"),
                ("REQMEM", "1Gn"),
                ("NNodes", "1"),
                ("NTasks", "1"),
                ("MaxRSS", "499092K"),
                ("TotalCPU", "01:27:29"),
                ("Elapsed", "01:27:42"),
            ],
            &[
                ("JobID", "24418435.extern"),
                ("JobIDRaw", "24418435.extern"),
                ("State", "COMPLETED"),
                ("AllocCPUS", "1"),
                ("REQMEM", "1Gn"),
                ("NNodes", "1"),
                ("NTasks", "1"),
                ("MaxRSS", "1376K"),
                ("TotalCPU", "00:00:00"),
                ("Elapsed", "01:27:42"),
            ],
        ],
    )
}

/// Array element 421 of 24220929, which ran as job 24221219.
pub fn array_element(columns: &[String], with_primary: bool) -> String {
    let primary: &[(&str, &str)] = &[
        ("JobID", "24220929_421"),
        ("JobIDRaw", "24221219"),
        ("State", "COMPLETED"),
        ("AllocCPUS", "1"),
        ("REQMEM", "16000Mn"),
        ("NNodes", "1"),
        ("TotalCPU", "09:28.052"),
        ("Elapsed", "00:09:34"),
    ];
    let batch: &[(&str, &str)] = &[
        ("JobID", "24220929_421.batch"),
        ("JobIDRaw", "24221219.batch"),
        ("State", "COMPLETED"),
        ("AllocCPUS", "1"),
        ("REQMEM", "16000Mn"),
        ("NNodes", "1"),
        ("NTasks", "1"),
        ("MaxRSS", "5664932K"),
        ("TotalCPU", "09:28.051"),
        ("Elapsed", "00:09:34"),
    ];
    let external: &[(&str, &str)] = &[
        ("JobID", "24220929_421.extern"),
        ("JobIDRaw", "24221219.extern"),
        ("State", "COMPLETED"),
        ("AllocCPUS", "1"),
        ("REQMEM", "16000Mn"),
        ("NNodes", "1"),
        ("NTasks", "1"),
        ("MaxRSS", "1404K"),
        ("TotalCPU", "00:00:00"),
        ("Elapsed", "00:09:34"),
    ];
    if with_primary {
        sacct_rows(columns, &[primary, batch, external])
    } else {
        sacct_rows(columns, &[batch, external])
    }
}

/// `JS1:` + base64(gzip(json)), the jobstats admin comment format.
pub fn encode_jobstats(json: &str) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();
    format!("JS1:{}", Base64::encode_string(&compressed))
}

/// Two nodes, one GPU each.
pub const TWO_NODE_GPU_STATS: &str = r#"{
    "gpus": 2,
    "nodes": {
        "node1": {
            "cpus": 4, "total_memory": 1000, "total_time": 400, "used_memory": 500,
            "gpu_utilization": {"0": 80}, "gpu_used_memory": {"0": 10}, "gpu_total_memory": {"0": 100}
        },
        "node2": {
            "cpus": 4, "total_memory": 1000, "total_time": 200, "used_memory": 250,
            "gpu_utilization": {"1": 40}, "gpu_used_memory": {"1": 30}, "gpu_total_memory": {"1": 100}
        }
    },
    "total_time": 100
}"#;
