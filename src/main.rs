use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use layerfix::batch::{self, BatchOptions, FileReport};
use layerfix::config::Config;
use layerfix::passes::{PassCatalog, PassId};
use layerfix::PassStatus;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "layerfix",
    about = "Layered, contract-checked fixes for JavaScript, TypeScript and JSX",
    version
)]
struct Cli {
    /// Log pass-level detail to stderr (overridden by LAYERFIX_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fix files in place
    Fix {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Print full JSON reports
        #[arg(long)]
        json: bool,
    },
    /// Report which passes would change each file; exits 1 if any would
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,

        #[arg(long)]
        json: bool,
    },
    /// List the pass catalog
    Passes,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Comma-separated pass ids (default: from config, else all)
    #[arg(long, value_delimiter = ',')]
    passes: Option<Vec<u8>>,

    /// Only run textual pass bodies
    #[arg(long)]
    no_structural: bool,

    /// Per-file run deadline
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Budget for each parser call
    #[arg(long)]
    parse_timeout_ms: Option<u64>,
}

impl RunArgs {
    fn batch_options(&self, config: &Config, catalog: &PassCatalog, write: bool) -> BatchOptions {
        let mut pipeline = config.pipeline_options();
        if self.no_structural {
            pipeline.prefer_structural = false;
        }
        if let Some(ms) = self.timeout_ms {
            pipeline.run_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = self.parse_timeout_ms {
            pipeline.parse_timeout = Duration::from_millis(ms.max(1));
        }
        let enabled = match &self.passes {
            Some(ids) => ids.iter().copied().map(PassId).collect(),
            None => config.enabled(catalog),
        };
        BatchOptions {
            pipeline,
            enabled,
            write,
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("LAYERFIX_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run(command: Command) -> Result<ExitCode> {
    let catalog = PassCatalog::builtin();
    match command {
        Command::Passes => {
            print_catalog(&catalog);
            Ok(ExitCode::SUCCESS)
        }
        Command::Fix {
            paths,
            run,
            dry_run,
            json,
        } => {
            let config = Config::load();
            let options = run.batch_options(&config, &catalog, !dry_run);
            let reports = batch::run_files(&paths, &options)?;
            if json {
                print_json(&reports)?;
            } else {
                for report in &reports {
                    print_summary(report, dry_run);
                }
            }
            let failed = reports.iter().any(|r| r.error.is_some());
            Ok(if failed {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Check { paths, run, json } => {
            let config = Config::load();
            let options = run.batch_options(&config, &catalog, false);
            let reports = batch::run_files(&paths, &options)?;
            if json {
                print_json(&reports)?;
            } else {
                for report in reports.iter().filter(|r| r.changed() || r.error.is_some()) {
                    print_summary(report, true);
                }
            }
            if reports.iter().any(|r| r.error.is_some()) {
                Ok(ExitCode::from(2))
            } else if reports.iter().any(FileReport::changed) {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn print_catalog(catalog: &PassCatalog) {
    println!("{:<4}{:<16}{:<10}{:<8}description", "id", "name", "deps", "radius");
    for pass in catalog.iter() {
        let deps = if pass.dependencies.is_empty() {
            "-".to_string()
        } else {
            pass.dependencies
                .iter()
                .map(PassId::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        let radius = format!("{:?}", pass.blast_radius).to_lowercase();
        println!(
            "{:<4}{:<16}{:<10}{:<8}{}",
            pass.id, pass.name, deps, radius, pass.description
        );
    }
}

fn print_json(reports: &[FileReport]) -> Result<()> {
    let json = serde_json::to_string_pretty(reports).context("Failed to serialize reports")?;
    println!("{}", json);
    Ok(())
}

fn print_summary(file: &FileReport, dry_run: bool) {
    let path = file.path.display();
    let Some(report) = &file.report else {
        println!("{}: error: {}", path, file.error.as_deref().unwrap_or("unknown"));
        return;
    };

    if report.changed {
        let passes: Vec<String> = report
            .changed_passes()
            .iter()
            .map(|id| {
                report
                    .outcome(*id)
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| id.to_string())
            })
            .collect();
        let verb = if dry_run { "would fix" } else { "fixed" };
        println!("{}: {} ({})", path, verb, passes.join(", "));
    } else {
        println!("{}: unchanged", path);
    }

    for outcome in &report.outcomes {
        if matches!(
            outcome.status,
            PassStatus::Failed | PassStatus::Reverted | PassStatus::RolledBack
        ) {
            let reason = outcome
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            println!("  {} {}: {}", outcome.name, outcome.status.label(), reason);
        }
    }
    if let Some(severity) = report.conflicts.severity {
        println!(
            "  {} conflict(s), highest severity {}",
            report.conflicts.conflicts.len(),
            severity.label()
        );
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    if let Some(aborted) = &report.aborted {
        println!("  stopped early: {}", aborted);
    }
}
