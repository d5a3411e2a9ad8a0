use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use occurrence_harvester::app::{App, FinalizeResult, HarvestResult, HttpSources, StatusResult};
use occurrence_harvester::config::ConfigLoader;
use occurrence_harvester::error::HarvestError;
use occurrence_harvester::output::{ConsoleProgress, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "occ-harvest")]
#[command(about = "Resumable, partitioned harvester for biodiversity occurrence records")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Config file (default: ./occ-harvest.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Harvest every pending partition, then write collections")]
    Harvest(JobArgs),
    #[command(about = "Re-harvest truncated months one day at a time")]
    Refine(JobArgs),
    #[command(about = "Show stored progress without contacting any source")]
    Status(JobArgs),
    #[command(about = "Rewrite collections from the record journal")]
    Finalize(JobArgs),
}

#[derive(Args)]
struct JobArgs {
    /// Restrict to these jobs; repeatable. Defaults to every job.
    #[arg(long = "job")]
    jobs: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ProgressStoreCorrupt { .. } | HarvestError::ProgressLocked(_) => 4,
        HarvestError::MissingConfig
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_)
        | HarvestError::UnknownJob(_) => 2,
        HarvestError::TransientSource(_)
        | HarvestError::SourceUnavailable { .. }
        | HarvestError::SourceStatus { .. }
        | HarvestError::SourceHttp(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::new(config, HttpSources);

    match cli.command {
        Commands::Harvest(args) => {
            let result = match output_mode {
                OutputMode::NonInteractive => app.harvest(&args.jobs, &JsonOutput)?,
                OutputMode::Interactive => app.harvest(&args.jobs, &ConsoleProgress)?,
            };
            report_harvest(&result, output_mode)
        }
        Commands::Refine(args) => {
            let result = match output_mode {
                OutputMode::NonInteractive => app.refine(&args.jobs, &JsonOutput)?,
                OutputMode::Interactive => app.refine(&args.jobs, &ConsoleProgress)?,
            };
            report_harvest(&result, output_mode)
        }
        Commands::Status(args) => {
            let result = app.status(&args.jobs)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_status(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    print_status_summary(&result);
                    Ok(())
                }
            }
        }
        Commands::Finalize(args) => {
            let result = app.finalize(&args.jobs)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_finalize(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    print_finalize_summary(&result);
                    Ok(())
                }
            }
        }
    }
}

fn report_harvest(result: &HarvestResult, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_harvest(result).into_diagnostic(),
        OutputMode::Interactive => {
            print_harvest_summary(result);
            Ok(())
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_harvest_summary(result: &HarvestResult) {
    println!("{CYAN}📦 occ-harvest summary{RESET}");
    if result.jobs.is_empty() {
        println!("{YELLOW}• nothing to do{RESET}");
    }
    for report in &result.jobs {
        let summary = &report.summary;
        println!(
            "{CYAN}{} ({}): {}{RESET}",
            report.job, report.source, report.universe
        );
        println!(
            "{GREEN}✅ complete: {}  records added: {}  total: {}{RESET}",
            summary.completed, summary.records_added, summary.records_total
        );
        if summary.skipped > 0 {
            println!("{GREEN}♻️ already finished: {}{RESET}", summary.skipped);
        }
        if summary.records_dropped > 0 {
            println!("{YELLOW}• dropped records: {}{RESET}", summary.records_dropped);
        }
        if !summary.truncated_partitions.is_empty() {
            println!(
                "{YELLOW}⚠️ truncated (coverage incomplete): {}{RESET}",
                summary.truncated_partitions.len()
            );
            for key in &summary.truncated_partitions {
                println!("{YELLOW}   {key}{RESET}");
            }
        }
        if summary.unavailable > 0 {
            println!(
                "{RED}✖ source unavailable: {}  pending: {}  in progress: {}{RESET}",
                summary.unavailable,
                summary.pending.len(),
                summary.in_progress.len()
            );
        }
        println!("{CYAN}   📁 {}{RESET}", report.collection_path);
    }
}

fn print_status_summary(result: &StatusResult) {
    println!("{CYAN}📦 occ-harvest status{RESET}");
    for status in &result.jobs {
        let tally = &status.tally;
        println!(
            "{CYAN}{} ({}): {}{RESET}",
            status.job, status.source, status.universe
        );
        let color = if tally.complete + tally.truncated == tally.total {
            GREEN
        } else {
            YELLOW
        };
        println!(
            "{color}   {}/{} finished, {} pending, {} in progress, {} truncated, {} records fetched{RESET}",
            tally.complete + tally.truncated,
            tally.total,
            tally.pending,
            tally.in_progress,
            tally.truncated,
            tally.records_fetched
        );
        if status.refinable_months > 0 {
            println!(
                "{YELLOW}   ⚠️ {} truncated month(s); run `occ-harvest refine --job {}`{RESET}",
                status.refinable_months, status.job
            );
        }
    }
}

fn print_finalize_summary(result: &FinalizeResult) {
    println!("{CYAN}📦 occ-harvest finalize{RESET}");
    for entry in &result.jobs {
        println!(
            "{GREEN}✅ {}: {} records -> {}{RESET}",
            entry.job, entry.records, entry.collection_path
        );
    }
}
