//! Accounting queries
//!
//! Runs `sacct` (and `scontrol` for partition time limits) and hands back the
//! raw text; parsing happens in [`crate::parser`].

use crate::config::QueryConfig;
use crate::parser::parse_duration;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Which jobs the accounting query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    /// `--jobs=...`, base ids only.
    Jobs(Vec<String>),
    /// `--user=...`; defaults to a recent window when no start time is given.
    User(String),
    /// `--allusers`
    AllUsers,
}

#[derive(Debug, Clone)]
pub struct SacctQuery {
    pub scope: QueryScope,
    /// Already formatted `--starttime`/`--endtime` values.
    pub since: Option<String>,
    pub until: Option<String>,
    pub partition: Option<String>,
    pub cluster: Option<String>,
    pub extra_args: Vec<String>,
}

impl SacctQuery {
    pub fn new(scope: QueryScope) -> Self {
        Self {
            scope,
            since: None,
            until: None,
            partition: None,
            cluster: None,
            extra_args: Vec::new(),
        }
    }
}

pub struct SacctInquirer {
    sacct: String,
    scontrol: String,
    delimiter: String,
    user_window_days: i64,
}

impl SacctInquirer {
    pub fn new(config: &QueryConfig) -> Self {
        Self {
            sacct: config.sacct.clone(),
            scontrol: config.scontrol.clone(),
            delimiter: config.delimiter.clone(),
            user_window_days: config.user_window_days,
        }
    }

    /// Arguments for the accounting query, without the program name.
    pub fn build_args(&self, columns: &[String], query: &SacctQuery, now: NaiveDateTime) -> Vec<String> {
        let mut args = vec![
            "--parsable".to_string(),
            "-n".to_string(),
            format!("--delimiter={}", self.delimiter),
            format!("--format={}", columns.join(",")),
        ];

        let mut since = query.since.clone();
        match &query.scope {
            QueryScope::User(user) => {
                if since.is_none() {
                    let start = now - ChronoDuration::days(self.user_window_days);
                    since = Some(start.format("%m%d%y").to_string());
                }
                args.push(format!("--user={}", user));
            }
            QueryScope::AllUsers => args.push("--allusers".to_string()),
            QueryScope::Jobs(ids) => args.push(format!("--jobs={}", ids.join(","))),
        }

        if let Some(since) = since {
            args.push(format!("--starttime={}", since));
        }
        if let Some(partition) = &query.partition {
            args.push(format!("--partition={}", partition));
        }
        if let Some(cluster) = &query.cluster {
            args.push(format!("--cluster={}", cluster));
        }
        if let Some(until) = &query.until {
            args.push(format!("--endtime={}", until));
        }
        args.extend(query.extra_args.iter().cloned());
        args
    }

    /// Field names the accounting tool accepts in `--format`.
    pub async fn valid_formats(&self) -> Result<Vec<String>> {
        let stdout = run(&self.sacct, &["--helpformat".to_string()])
            .await
            .context("Error retrieving sacct options with --helpformat")?;
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }

    /// Run the accounting query and return its raw output.
    pub async fn query(&self, columns: &[String], query: &SacctQuery, now: NaiveDateTime) -> Result<String> {
        let args = self.build_args(columns, query, now);
        info!(program = %self.sacct, args = ?args, "Querying accounting records");
        run(&self.sacct, &args).await.context("Error running sacct!")
    }

    /// Partition → MaxTime table. Failures only cost `Partition_Limit`
    /// resolution, so they are logged and yield an empty table.
    pub async fn partition_limits(&self, cluster: Option<&str>) -> HashMap<String, Duration> {
        let mut args = Vec::new();
        if let Some(cluster) = cluster {
            args.push("--cluster".to_string());
            args.push(cluster.to_string());
        }
        args.push("show".to_string());
        args.push("partition".to_string());

        match run(&self.scontrol, &args).await {
            Ok(stdout) => parse_partition_limits(&stdout),
            Err(e) => {
                warn!(error = %e, "Error retrieving information from scontrol");
                HashMap::new()
            }
        }
    }
}

async fn run(program: &str, args: &[String]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            program = program,
            exit_code = output.status.code(),
            stderr = %stderr,
            "Command failed"
        );
        anyhow::bail!("{} exited with {}: {}", program, output.status, stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    debug!(program = program, bytes = stdout.len(), "Command finished");
    Ok(stdout)
}

/// Parse `scontrol show partition` output into partition → MaxTime.
/// Unlimited or unparsable limits are left out.
pub fn parse_partition_limits(text: &str) -> HashMap<String, Duration> {
    let mut limits = HashMap::new();
    let mut partition: Option<&str> = None;

    for token in text.split_whitespace() {
        if let Some(name) = token.strip_prefix("PartitionName=") {
            partition = Some(name);
        } else if let Some(limit) = token.strip_prefix("MaxTime=") {
            if let (Some(name), Some(limit)) = (partition, parse_duration(limit)) {
                limits.insert(name.to_string(), limit);
            }
        }
    }
    limits
}

/// Split extra command line arguments the way a POSIX shell would, honoring
/// single quotes, double quotes and backslash escapes.
pub fn split_args(text: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => anyhow::bail!("Unterminated single quote in {:?}", text),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => anyhow::bail!("Unterminated double quote in {:?}", text),
                        },
                        Some(c) => current.push(c),
                        None => anyhow::bail!("Unterminated double quote in {:?}", text),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(c) = chars.next() {
                    current.push(c);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-03-10T12:00:00", "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn inquirer() -> SacctInquirer {
        SacctInquirer::new(&QueryConfig::default())
    }

    fn columns() -> Vec<String> {
        vec!["JobID".to_string(), "State".to_string()]
    }

    #[test]
    fn test_job_query_args() {
        let mut query = SacctQuery::new(QueryScope::Jobs(vec!["1".to_string(), "2".to_string()]));
        query.partition = Some("gpu".to_string());
        query.extra_args = vec!["--units=G".to_string()];

        let args = inquirer().build_args(&columns(), &query, now());
        assert_eq!(
            args,
            vec![
                "--parsable",
                "-n",
                "--delimiter=^|^",
                "--format=JobID,State",
                "--jobs=1,2",
                "--partition=gpu",
                "--units=G",
            ]
        );
    }

    #[test]
    fn test_user_query_defaults_to_last_week() {
        let query = SacctQuery::new(QueryScope::User("alice".to_string()));
        let args = inquirer().build_args(&columns(), &query, now());
        assert!(args.contains(&"--user=alice".to_string()));
        assert!(args.contains(&"--starttime=030324".to_string()));

        let mut query = SacctQuery::new(QueryScope::User("alice".to_string()));
        query.since = Some("2024-01-01T00:00".to_string());
        let args = inquirer().build_args(&columns(), &query, now());
        assert!(args.contains(&"--starttime=2024-01-01T00:00".to_string()));
    }

    #[test]
    fn test_all_users_with_window() {
        let mut query = SacctQuery::new(QueryScope::AllUsers);
        query.since = Some("2024-03-08T11:00".to_string());
        query.until = Some("2024-03-09T11:00".to_string());
        query.cluster = Some("della".to_string());
        let args = inquirer().build_args(&columns(), &query, now());
        assert_eq!(
            &args[4..],
            [
                "--allusers",
                "--starttime=2024-03-08T11:00",
                "--cluster=della",
                "--endtime=2024-03-09T11:00",
            ]
        );
    }

    #[test]
    fn test_parse_partition_limits() {
        let text = "PartitionName=cpu\n   AllowGroups=ALL Default=YES\n   MaxNodes=UNLIMITED MaxTime=1-00:00:00 MinNodes=0\n\n\
                    PartitionName=gpu\n   MaxTime=06:00:00\n\n\
                    PartitionName=debug\n   MaxTime=UNLIMITED\n";
        let limits = parse_partition_limits(text);
        assert_eq!(limits.get("cpu"), Some(&Duration::from_secs(86_400)));
        assert_eq!(limits.get("gpu"), Some(&Duration::from_secs(21_600)));
        assert_eq!(limits.get("debug"), None);
    }

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args(r#"--units=G  --name="my job" -X 'a b'"#).unwrap(),
            vec!["--units=G", "--name=my job", "-X", "a b"]
        );
        assert_eq!(split_args("").unwrap(), Vec::<String>::new());
        assert!(split_args("'open").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_sacct_is_an_error() {
        let config = QueryConfig {
            sacct: "false".to_string(),
            scontrol: "false".to_string(),
            ..QueryConfig::default()
        };
        let inquirer = SacctInquirer::new(&config);
        let query = SacctQuery::new(QueryScope::Jobs(vec!["1".to_string()]));
        assert!(inquirer.query(&columns(), &query, now()).await.is_err());
        assert!(inquirer.partition_limits(None).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_query_returns_stdout() {
        let config = QueryConfig {
            sacct: "echo".to_string(),
            ..QueryConfig::default()
        };
        let inquirer = SacctInquirer::new(&config);
        let query = SacctQuery::new(QueryScope::Jobs(vec!["42".to_string()]));
        let stdout = inquirer.query(&columns(), &query, now()).await.unwrap();
        assert!(stdout.contains("--jobs=42"));
    }
}
