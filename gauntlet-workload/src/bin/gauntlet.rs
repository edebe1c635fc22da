//! Gauntlet workload runner.
//!
//! Runs the built-in FSM workloads against the in-process database.
//!
//! ```bash
//! # List workloads and profiles
//! gauntlet list
//!
//! # Quick pass over everything
//! gauntlet run --profile smoke
//!
//! # One workload, more clients, fixed seed
//! gauntlet run --include agg_out --threads 32 --seed 7
//!
//! # Profile from a file, skipping a workload
//! gauntlet run --config nightly.toml --exclude create_drop
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gauntlet_workload::profiles::{list_profiles, load_profile};
use gauntlet_workload::{builtin_registry, HarnessProfile, MemoryDatabase, SuiteRunner};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Concurrent FSM workload harness.
#[derive(Parser, Debug)]
#[command(name = "gauntlet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List built-in workloads and profiles.
    List,
    /// Run a selection of workloads.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Built-in profile name.
    #[arg(long, default_value = "default", conflicts_with = "config")]
    profile: String,

    /// Profile TOML file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for every random stream.
    #[arg(long)]
    seed: Option<u64>,

    /// Thread count for every workload.
    #[arg(long)]
    threads: Option<u32>,

    /// Iterations for every workload.
    #[arg(long)]
    iterations: Option<u64>,

    /// Wall-clock cap per workload in seconds (0 disables it).
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Workloads to run (repeatable). Default: all.
    #[arg(long)]
    include: Vec<String>,

    /// Workloads to skip (repeatable).
    #[arg(long)]
    exclude: Vec<String>,
}

impl RunArgs {
    fn profile(&self) -> Result<HarnessProfile, Box<dyn std::error::Error>> {
        let mut profile = match &self.config {
            Some(path) => HarnessProfile::from_file(path)?,
            None => load_profile(&self.profile)?,
        };

        if let Some(seed) = self.seed {
            profile.run.seed = seed;
        }
        if let Some(timeout) = self.timeout_secs {
            profile.run.timeout_secs = timeout;
        }
        if self.threads.is_some() {
            profile.scale.threads = self.threads;
        }
        if self.iterations.is_some() {
            profile.scale.iterations = self.iterations;
        }
        if !self.include.is_empty() {
            profile.selection.include.clone_from(&self.include);
        }
        profile.selection.exclude.extend(self.exclude.iter().cloned());
        profile.validate()?;
        Ok(profile)
    }
}

async fn run(args: &RunArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let profile = args.profile()?;
    info!(
        profile = %profile.name,
        seed = profile.run.seed,
        include = ?profile.selection.include,
        exclude = ?profile.selection.exclude,
        "Starting gauntlet"
    );

    let runner = SuiteRunner::from_profile(builtin_registry(), &profile);
    let report = runner.run(Arc::new(MemoryDatabase::new())).await?;
    report.print_summary();
    Ok(report.is_success())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; the summary goes to stdout.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
        return ExitCode::FAILURE;
    }

    let run_args = match args.command {
        Command::List => {
            println!("Workloads:");
            for name in builtin_registry().names() {
                println!("  {name}");
            }
            println!("Profiles:");
            for name in list_profiles() {
                println!("  {name}");
            }
            return ExitCode::SUCCESS;
        }
        Command::Run(run_args) => run_args,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::from(2);
        }
    };
    let code = match runtime.block_on(run(&run_args)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    };
    // Executors that ignored cancellation may still hold blocking threads.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}
