use std::io::Write;
use std::process;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cyclescope::error::Error;
use cyclescope::workload::Workload;
use cyclescope_runtime::{Config, Session, Tsc};

#[derive(Parser)]
#[command(
    name = "cyclescope",
    about = "Cycle-counter region profiler",
    version,
    after_help = "Set CYCLESCOPE=0 to disable profiling."
)]
struct Cli {
    /// Log calibration details and profiler warnings to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the cycle counter frequency.
    Calibrate {
        /// Length of the calibration spin in milliseconds.
        #[arg(long, default_value_t = 50)]
        wait_ms: u64,
    },
    /// Run a built-in instrumented workload and print its report.
    Demo {
        /// Buffer size filled and checksummed on each pass.
        #[arg(long, default_value_t = 1024 * 1024)]
        bytes: usize,

        /// Fibonacci argument for the recursive region.
        #[arg(long, default_value_t = 16)]
        depth: u32,

        /// Number of passes over the workload.
        #[arg(long, default_value_t = 4)]
        passes: u32,

        /// Print the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Calibrate { wait_ms } => cmd_calibrate(wait_ms),
        Commands::Demo {
            bytes,
            depth,
            passes,
            json,
        } => cmd_demo(
            Workload {
                bytes,
                depth,
                passes,
            },
            json,
        ),
    }
}

fn cmd_calibrate(wait_ms: u64) -> Result<(), Error> {
    let wait = Duration::from_millis(wait_ms);
    let start = Instant::now();
    let freq = cyclescope_runtime::calibrate(&Tsc, wait)?;
    let elapsed = start.elapsed();

    let mut out = std::io::stdout().lock();
    writeln!(out, "  OS wait: {:.4}s", elapsed.as_secs_f64())?;
    writeln!(out, " CPU freq: {freq} (estimated)")?;
    Ok(())
}

fn cmd_demo(workload: Workload, json: bool) -> Result<(), Error> {
    let mut session = Session::new(Tsc, Config::from_env());
    let checksum = workload.run(&mut session)?;
    tracing::debug!(checksum, "demo workload finished");

    if !json {
        session.print_report();
        return Ok(());
    }
    let Some(report) = session.report() else {
        return Ok(());
    };
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &report)?;
    writeln!(out)?;
    Ok(())
}
