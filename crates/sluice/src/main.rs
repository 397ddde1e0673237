//! Sluice CLI: watches landing-zone clusters and appends files to bronze Delta tables.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;

use sluice::app::{load_config, run_ingest, run_scan, run_service, stats_report};
use sluice::{ClusterKey, ConfigArgs, FileOutcome, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "sluice", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the backlog, then watch cluster directories until stopped
    Run {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Process the backlog once and exit
    Scan {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Ingest a single file into a cluster's bronze table
    Ingest {
        #[command(flatten)]
        config: ConfigArgs,
        /// Cluster whose table receives the file
        #[arg(long)]
        cluster: String,
        /// File to ingest
        file: PathBuf,
    },
    /// Print bronze table statistics as JSON
    Stats {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

impl Command {
    fn config_args(&self) -> &ConfigArgs {
        match self {
            Command::Run { config }
            | Command::Scan { config }
            | Command::Ingest { config, .. }
            | Command::Stats { config } => config,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let args = cli.command.config_args();
    if args.config_paths().is_empty() {
        eprintln!("Error: no config files or directories specified");
        return ExitCode::FAILURE;
    }

    let config = match load_config(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Run { .. } => {
            info!("Starting sluice");
            match run_service(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Sluice failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Scan { .. } => match run_scan(config).await {
            Ok(summary) if summary.failed == 0 => ExitCode::SUCCESS,
            Ok(summary) => {
                eprintln!("{} file(s) failed", summary.failed);
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("Scan failed: {e}");
                ExitCode::FAILURE
            }
        },
        Command::Ingest { cluster, file, .. } => {
            match run_ingest(&config, ClusterKey::new(cluster), &file).await {
                Ok(FileOutcome::Written { version, rows, .. }) => {
                    println!("Wrote {rows} row(s), table version {version}");
                    ExitCode::SUCCESS
                }
                Ok(FileOutcome::Empty) => {
                    println!("File has no data rows, nothing written");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Stats { .. } => match stats_report(&config.bronze_root).await {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to collect stats: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
