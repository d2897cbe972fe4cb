use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::time::SystemTime;
use tracing::{debug, info};

use sacct_eff::analyzer::{ReportAnalyzer, ReportOptions};
use sacct_eff::config::Config;
use sacct_eff::display::{parse_format, OutputRenderer, RenderOptions};
use sacct_eff::file_discovery::FileDiscovery;
use sacct_eff::filter::{JobFilter, JobSelection, SortOrder};
use sacct_eff::inquirer::{split_args, QueryScope, SacctInquirer, SacctQuery};
use sacct_eff::logging::init_logging;
use sacct_eff::timestamp_parser::TimestampParser;

#[derive(Parser)]
#[command(name = "sacct-eff")]
#[command(about = "CPU, memory and wall time efficiency of Slurm jobs, from sacct accounting records")]
#[command(version)]
struct Cli {
    /// Comma separated columns, e.g. "JobID%>,State,CPUEff". Prefix with + to add to the defaults
    #[arg(long)]
    format: Option<String>,

    /// The sbatch --output pattern of the job files, e.g. "%x.%j.out"
    #[arg(long)]
    slurm_format: Option<String>,

    /// Sort by output file modification time, newest first
    #[arg(long)]
    modified_sort: bool,

    /// Force colored output
    #[arg(long, conflicts_with = "no_color")]
    color: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Print the raw accounting output to stderr
    #[arg(long)]
    debug: bool,

    /// Report the recent jobs of a user
    #[arg(short, long)]
    user: Option<String>,

    /// Only jobs of this partition
    #[arg(long)]
    partition: Option<String>,

    /// Query this cluster
    #[arg(long)]
    cluster: Option<String>,

    /// Extra arguments passed to sacct, split like a shell command line
    #[arg(long, allow_hyphen_values = true)]
    extra_args: Option<String>,

    /// Comma separated states to include, e.g. "CD,TO" or "completed"
    #[arg(short = 's', long)]
    state: Option<String>,

    /// Comma separated states to exclude
    #[arg(short = 'S', long)]
    not_state: Option<String>,

    /// Only jobs ending after this time: YYYY-MM-DD[THH:MM[:SS]] or relative like d=2,h=1
    #[arg(long)]
    since: Option<String>,

    /// Only jobs starting before this time, same formats as --since
    #[arg(long)]
    until: Option<String>,

    /// Show a row per node for multi-node jobs
    #[arg(short, long)]
    node: bool,

    /// Show a row per node and per GPU
    #[arg(short = 'g', long)]
    node_and_gpu: bool,

    /// Print "|" separated rows without a header
    #[arg(short, long)]
    parsable: bool,

    /// Job ids, output files, or a single directory of output files (default: current directory)
    jobs: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        handle_error(e);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let _guard = init_logging(&config, cli.debug);

    let color = !cli.parsable
        && if cli.color {
            true
        } else if cli.no_color {
            false
        } else {
            config
                .display
                .color
                .unwrap_or_else(|| std::io::stdout().is_terminal())
        };
    colored::control::set_override(color);

    let inquirer = SacctInquirer::new(&config.query);
    let valid_formats = inquirer.valid_formats().await?;

    let format = cli.format.as_deref().unwrap_or(&config.display.format);
    let specs = parse_format(format, &config.display.format)?;
    let renderer = OutputRenderer::new(
        &valid_formats,
        specs,
        RenderOptions {
            node: cli.node,
            gpu: cli.node_and_gpu,
            parsable: cli.parsable,
            color,
            column_gap: config.display.column_gap,
            thresholds: config.thresholds.clone(),
        },
    );
    for column in renderer.unknown_columns() {
        warn_user(&format!("Unknown column {:?}, it will be left empty", column));
    }

    let now = Local::now().naive_local();
    let (since_arg, since) = match &cli.since {
        Some(text) => {
            let (arg, at) = TimestampParser::resolve_bound(text, now);
            (Some(arg), at)
        }
        None => (None, None),
    };
    let (until_arg, until) = match &cli.until {
        Some(text) => {
            let (arg, at) = TimestampParser::resolve_bound(text, now);
            (Some(arg), at)
        }
        None => (None, None),
    };

    let filter = JobFilter::new()
        .with_states(
            cli.state.as_deref().unwrap_or(""),
            cli.not_state.as_deref().unwrap_or(""),
        )
        .with_window(since, until);
    for state in filter.unknown_states() {
        warn_user(&format!("Unknown state {}", state));
    }

    let mut mtimes = HashMap::new();
    let (scope, selection) = if let Some(user) = &cli.user {
        (QueryScope::User(user.clone()), JobSelection::all())
    } else if since_arg.is_some() && cli.jobs.is_empty() {
        (QueryScope::AllUsers, JobSelection::all())
    } else {
        let mut selection = JobSelection::new();
        if let Some(pattern) = &cli.slurm_format {
            selection.set_custom_format(pattern)?;
        }
        select_jobs(&mut selection, &cli.jobs, &mut mtimes)?;
        (QueryScope::Jobs(selection.query_ids()), selection)
    };

    let options = ReportOptions {
        selection,
        filter,
        sort: if cli.modified_sort {
            SortOrder::Modified
        } else {
            SortOrder::JobId
        },
        mtimes,
    };

    if options.selection.is_empty() {
        info!("No jobs selected, skipping the accounting query");
        let analyzer = ReportAnalyzer::new(renderer, &config);
        println!("{}", analyzer.report("", &options).output);
        return Ok(());
    }

    let mut query = SacctQuery::new(scope);
    query.since = since_arg;
    query.until = until_arg;
    query.partition = cli.partition.clone();
    query.cluster = cli.cluster.clone();
    if let Some(extra) = &cli.extra_args {
        query.extra_args = split_args(extra).context("Unable to split --extra-args")?;
    }

    let limits = if renderer.query_columns().iter().any(|c| c == "Timelimit") {
        inquirer.partition_limits(cli.cluster.as_deref()).await
    } else {
        HashMap::new()
    };

    let output = inquirer
        .query(renderer.query_columns(), &query, now)
        .await?;
    if cli.debug {
        eprintln!("{}", output);
    }

    let analyzer = ReportAnalyzer::new(renderer, &config).with_partition_limits(limits);
    let report = analyzer.report(&output, &options);
    debug!(jobs = report.job_count, "Report finished");
    println!("{}", report.output);

    Ok(())
}

/// Fill the selection from the positional arguments: nothing means the
/// current directory, a single directory means its files, anything else is a
/// list of job ids and output files.
fn select_jobs(
    selection: &mut JobSelection,
    args: &[String],
    mtimes: &mut HashMap<String, SystemTime>,
) -> Result<()> {
    let directory = match args {
        [] => Some(std::env::current_dir().context("Unable to read the current directory")?),
        [single] if Path::new(single).is_dir() => Some(PathBuf::from(single)),
        _ => None,
    };

    if let Some(directory) = directory {
        for file in FileDiscovery::new().list_output_files(&directory)? {
            if selection.process_output_file(&file.name) {
                if let Some(modified) = file.modified {
                    mtimes.insert(file.name, modified);
                }
            }
        }
        return Ok(());
    }

    for arg in args {
        if !selection.add_argument(arg) {
            warn_user(&format!("Unable to determine a job id from {}", arg));
            continue;
        }
        if let Some(modified) = FileDiscovery::modified(Path::new(arg)) {
            mtimes.insert(arg.clone(), modified);
        }
    }
    Ok(())
}

fn warn_user(message: &str) {
    eprintln!("{}", message.yellow());
}

fn handle_error(e: anyhow::Error) -> ! {
    eprintln!("{}", format!("Error: {:#}", e).red());
    process::exit(1);
}
