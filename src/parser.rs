//! Accounting record parsing
//!
//! Turns the delimiter separated text printed by
//! `sacct --parsable -n --delimiter=^|^ --format=...` into [`RawRecord`]s.
//! Rows end with the delimiter followed by a newline, so a field may itself
//! contain newlines (admin comments do); those are kept as a literal `\n`.
//!
//! Nothing in here fails: a row with too few fields is skipped and a field
//! that cannot be parsed (or holds a sentinel such as `UNLIMITED`) becomes
//! `None`.

use crate::models::{JobId, JobState, RawRecord};
use crate::timestamp_parser::TimestampParser;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Field text the accounting tool uses for "no value".
const SENTINELS: [&str; 7] = [
    "",
    "UNLIMITED",
    "Partition_Limit",
    "INVALID",
    "Unknown",
    "None",
    "N/A",
];

pub struct RecordParser {
    columns: Vec<String>,
    delimiter: String,
}

impl RecordParser {
    /// `columns` is the order the fields were requested in (`--format`).
    pub fn new(columns: &[String], delimiter: impl Into<String>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_lowercase()).collect(),
            delimiter: delimiter.into(),
        }
    }

    pub fn parse(&self, text: &str) -> Vec<RawRecord> {
        if !self.columns.iter().any(|c| c == "jobid") {
            warn!(columns = ?self.columns, "JobID was not queried, no records can be parsed");
            return Vec::new();
        }

        let terminator = format!("{}\n", self.delimiter);
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for chunk in text.split(terminator.as_str()) {
            let line = chunk.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            let line = line.replace('\n', "\\n");
            match self.parse_row(records.len(), &line) {
                Some(record) => records.push(record),
                None => {
                    skipped += 1;
                    debug!(line = %line, "Skipping malformed accounting row");
                }
            }
        }

        debug!(
            records = records.len(),
            skipped = skipped,
            "Parsed accounting output"
        );
        records
    }

    fn parse_row(&self, ordinal: usize, line: &str) -> Option<RawRecord> {
        let values: Vec<&str> = line.split(self.delimiter.as_str()).collect();
        if values.len() < self.columns.len() {
            return None;
        }

        let job_id_index = self.columns.iter().position(|c| c == "jobid")?;
        let job_id = parse_job_id(values[job_id_index])?;
        let mut record = RawRecord::new(ordinal, job_id);
        let mut req_mem = None;

        for (column, value) in self.columns.iter().zip(values.iter().copied()) {
            let trimmed = value.trim();
            record.fields.insert(column.clone(), trimmed.to_string());
            match column.as_str() {
                "jobidraw" => record.job_id_raw = parse_job_id(trimmed),
                "state" if !trimmed.is_empty() => {
                    record.state = Some(JobState::from_sacct(trimmed))
                }
                "elapsed" => record.elapsed = parse_duration(trimmed),
                "totalcpu" => record.total_cpu = parse_duration(trimmed),
                "timelimit" if !trimmed.is_empty() => {
                    record.timelimit = Some(trimmed.to_string())
                }
                "reqmem" => req_mem = Some(trimmed),
                "maxrss" => record.max_rss = parse_memory(trimmed, 1, 1),
                "alloccpus" => record.alloc_cpus = trimmed.parse().ok(),
                "nnodes" => record.nnodes = trimmed.parse().ok(),
                "ntasks" => record.ntasks = trimmed.parse().ok(),
                "partition" if !trimmed.is_empty() => {
                    record.partition = Some(trimmed.to_string())
                }
                "admincomment" if !trimmed.is_empty() => {
                    record.admin_comment = Some(trimmed.to_string())
                }
                "start" => record.start = TimestampParser::parse_sacct(trimmed),
                "end" => record.end = TimestampParser::parse_sacct(trimmed),
                "tresusageoutave" => record.energy = parse_energy(trimmed),
                _ => {}
            }
        }

        // REQMEM scales with the node and cpu counts of the same row
        if let Some(text) = req_mem {
            record.req_mem = parse_memory(
                text,
                record.nnodes.unwrap_or(1),
                record.alloc_cpus.unwrap_or(1),
            );
        }

        Some(record)
    }
}

static JOB_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>[^_.\s]+)(?:_(?P<index>[^.\s]+))?(?:\.(?P<step>\S+))?$")
        .expect("job id pattern is valid")
});

/// Split `BASE[_INDEX][.STEP]` into its parts.
pub fn parse_job_id(text: &str) -> Option<JobId> {
    let captures = JOB_ID.captures(text.trim())?;
    Some(JobId {
        base: captures.name("base")?.as_str().to_string(),
        array_index: captures.name("index").map(|m| m.as_str().to_string()),
        step: captures.name("step").map(|m| m.as_str().to_string()),
    })
}

fn is_sentinel(text: &str) -> bool {
    SENTINELS.contains(&text)
}

/// Parse `D-HH:MM:SS`, `HH:MM:SS`, `MM:SS` or `MM:SS.mmm`.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if is_sentinel(text) {
        return None;
    }

    let (days, clock) = match text.split_once('-') {
        Some((days, rest)) => (days.parse::<u64>().ok()?, rest),
        None => (0, text),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };

    let (seconds, nanos) = parse_seconds(seconds)?;

    let whole = days
        .checked_mul(86_400)?
        .checked_add(hours.checked_mul(3_600)?)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    Some(Duration::new(whole, nanos))
}

/// `SS` or `SS.fff`, digits only. The fraction is cut at nanoseconds.
fn parse_seconds(text: &str) -> Option<(u64, u32)> {
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() || !whole.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits: String = fraction.chars().take(9).collect();
    let nanos = if digits.is_empty() {
        0
    } else {
        format!("{:0<9}", digits).parse::<u32>().ok()?
    };
    Some((whole.parse().ok()?, nanos))
}

/// Format a duration the way sacct prints Elapsed.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

static MEMORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<memory>[-+]?\d*\.\d+|\d+)(?P<multiple>[KMGTPE]?)(?P<type>[nc]?)$")
        .expect("memory pattern is valid")
});

/// Parse ReqMem/MaxRSS text into bytes.
///
/// Units are relative to kibibytes, so a bare number counts as KiB. A trailing
/// `n` scales by `nodes`, a trailing `c` by `cpus`.
pub fn parse_memory(text: &str, nodes: u32, cpus: u32) -> Option<f64> {
    let text = text.trim();
    if is_sentinel(text) {
        return None;
    }
    if text == "0" {
        return Some(0.0);
    }

    let captures = MEMORY.captures(text)?;
    let mut kib: f64 = captures.name("memory")?.as_str().parse().ok()?;

    kib *= match captures.name("multiple").map(|m| m.as_str()) {
        Some("M") => 1024f64,
        Some("G") => 1024f64.powi(2),
        Some("T") => 1024f64.powi(3),
        Some("P") => 1024f64.powi(4),
        Some("E") => 1024f64.powi(5),
        _ => 1.0,
    };

    match captures.name("type").map(|m| m.as_str()) {
        Some("n") => kib *= f64::from(nodes),
        Some("c") => kib *= f64::from(cpus),
        _ => {}
    }

    Some(kib * 1024.0)
}

/// Extract `energy=N` from a TRES usage string such as `cpu=1,energy=2048`.
pub fn parse_energy(tres: &str) -> Option<u64> {
    tres.split(',')
        .filter_map(|entry| entry.split_once('='))
        .find(|(name, _)| *name == "energy")
        .and_then(|(_, value)| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_job_id_parts() {
        let id = parse_job_id("24220929_421.batch").unwrap();
        assert_eq!(id.base, "24220929");
        assert_eq!(id.array_index.as_deref(), Some("421"));
        assert_eq!(id.step.as_deref(), Some("batch"));

        let id = parse_job_id("24418435").unwrap();
        assert_eq!(id.array_index, None);
        assert_eq!(id.step, None);

        let id = parse_job_id("123_[1-5]").unwrap();
        assert_eq!(id.array_index.as_deref(), Some("[1-5]"));

        assert!(parse_job_id("").is_none());
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("01:27:42"), Some(Duration::from_secs(5262)));
        assert_eq!(
            parse_duration("1-00:00:00"),
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(parse_duration("09:28.052").map(|d| d.as_secs()), Some(568));
        assert_eq!(parse_duration("UNLIMITED"), None);
        assert_eq!(parse_duration("Partition_Limit"), None);
        assert_eq!(parse_duration("garbage"), None);
        assert_eq!(
            parse_duration("00:00:01.5"),
            Some(Duration::from_millis(1_500))
        );
        assert_eq!(parse_duration("00:00:1e20"), None);
        assert_eq!(parse_duration("00:00:-1"), None);
        assert_eq!(parse_duration("00:00:+5"), None);
        assert_eq!(parse_duration("300000000000000-00:00:00"), None);
        assert_eq!(parse_duration("00:99999999999999999:00"), None);
    }

    #[test]
    fn test_format_duration_round_trips_elapsed() {
        for text in ["00:09:34", "01:27:42", "11-02:46:01"] {
            assert_eq!(format_duration(parse_duration(text).unwrap()), text);
        }
    }

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory("1376K", 1, 1), Some(1376.0 * 1024.0));
        assert_eq!(parse_memory("4G", 1, 1), Some(4.0 * 1024f64.powi(3)));
        assert_eq!(parse_memory("1Gn", 2, 8), Some(2.0 * 1024f64.powi(3)));
        assert_eq!(
            parse_memory("4000Mc", 1, 8),
            Some(8.0 * 4000.0 * 1024f64.powi(2))
        );
        assert_eq!(parse_memory("0", 1, 1), Some(0.0));
        assert_eq!(parse_memory("", 1, 1), None);
        assert_eq!(parse_memory("lots", 1, 1), None);
    }

    #[test]
    fn test_parse_energy() {
        assert_eq!(parse_energy("cpu=00:00:01,energy=2048,fs/disk=1"), Some(2048));
        assert_eq!(parse_energy("cpu=00:00:01"), None);
    }

    #[test]
    fn test_parser_skips_short_rows_and_trailing_text() {
        let parser = RecordParser::new(&columns(&["JobID", "State", "Elapsed"]), "|");
        let text = "1|COMPLETED|00:01:00|\n\
                    2|FAILED|\n\
                    3|RUNNING|00:00:10|extra|\n\
                    sacct: note: trailing information\n";
        let records = parser.parse(text);
        let ids: Vec<&str> = records.iter().map(|r| r.job_id.base.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(records[1].state, Some(JobState::Running));
    }

    #[test]
    fn test_parser_keeps_embedded_newlines_in_fields() {
        let parser = RecordParser::new(&columns(&["JobID", "Comment"]), "^|^");
        let text = "7^|^first\nsecond^|^\n8^|^plain^|^\n";
        let records = parser.parse(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields["comment"], "first\\nsecond");
    }

    #[test]
    fn test_parser_nulls_unparsable_fields() {
        let parser = RecordParser::new(
            &columns(&["JobID", "Elapsed", "MaxRSS", "AllocCPUS"]),
            "|",
        );
        let records = parser.parse("5|soon|huge|many|\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].elapsed, None);
        assert_eq!(records[0].max_rss, None);
        assert_eq!(records[0].alloc_cpus, None);

        let records = parser.parse("6|00:00:1e20|1e400K|99999999999|\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].elapsed, None);
        assert_eq!(records[0].alloc_cpus, None);
    }

    #[test]
    fn test_reqmem_uses_row_nodes_and_cpus() {
        let parser = RecordParser::new(
            &columns(&["JobID", "REQMEM", "NNodes", "AllocCPUS"]),
            "|",
        );
        let records = parser.parse("9|1Gn|4|80|\n");
        assert_eq!(records[0].req_mem, Some(4.0 * 1024f64.powi(3)));
    }
}
