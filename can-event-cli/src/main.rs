//! CAN Event Dispatcher CLI Application
//!
//! Runs a simulated CAN integration on top of the can-event-dispatcher library:
//! - Dispatchers and their ports from a scenario file
//! - Periodic CAN messages with timeout supervision
//! - Diagnostic notifications through internal events
//! - Report generation (TXT/JSON)

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;

mod callbacks;
mod config;
mod report;
mod simulation;
mod state;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Txt,
    Json,
}

/// CAN Event Dispatcher - Run dispatcher scenarios
#[derive(Parser, Debug)]
#[command(name = "can-event-cli")]
#[command(
    about = "Run simulated CAN integrations on the event dispatcher engine",
    long_about = None
)]
#[command(version)]
struct Args {
    /// Path to the scenario file (scenario.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the duration of the run
    #[arg(long, value_name = "MS")]
    duration_ms: Option<u64>,

    /// Run each dispatcher in a thread of its own, paced by the wall clock
    #[arg(long)]
    realtime: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value = "txt")]
    format: ReportFormat,

    /// Output file for the report (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Event Dispatcher CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using dispatcher library v{}", can_event_dispatcher::VERSION);

    match &args.config {
        // Scenario mode: build, run and report
        Some(config_path) => run_scenario(config_path, &args),
        None => {
            // No arguments - show help
            println!("CAN Event Dispatcher - No scenario specified");
            println!("\nQuick Start:");
            println!("  can-event-cli --config scenario.toml");
            println!("  can-event-cli --config scenario.toml --format json --output report.json");
            println!("\nA wall clock paced run with one thread per dispatcher:");
            println!("  can-event-cli --config scenario.toml --realtime --duration-ms 5000");
            println!("\nUse --help for more options");
            Ok(())
        }
    }
}

fn run_scenario(config_path: &PathBuf, args: &Args) -> Result<()> {
    log::info!("Loading scenario from: {:?}", config_path);
    let mut config = config::load_config(config_path)?;

    // Command line overrides the scenario's run settings
    if let Some(duration_ms) = args.duration_ms {
        config.run.duration_ms = duration_ms;
    }
    if args.realtime {
        config.run.realtime = true;
    }
    log::debug!("Scenario loaded: {} message(s)", config.messages.len());

    // Create the dispatcher system and run it
    let realtime = config.run.realtime;
    let result = simulation::Simulation::build(&config)?.run()?;
    let report = report::Report::from_run(&result, realtime);

    // Write the report
    let text = match args.format {
        ReportFormat::Txt => report.to_txt(),
        ReportFormat::Json => report.to_json()?,
    };

    match &args.output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write report: {:?}", path))?;
            log::info!("Report written to {:?}", path);
        }
        None => print!("{}", text),
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
