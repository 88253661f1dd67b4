//! Synthetic event generator CLI: reads a pipeline configuration, runs it to completion, and
//! maps the outcome to a process exit code.
use clap::{Parser, ValueEnum};
use eventum::config::Config;
use eventum::time::Mode;
use eventum::Runtime;
use std::path::PathBuf;

/// Generates synthetic timestamped events from a YAML pipeline configuration.
#[derive(Parser)]
#[command(name = "eventum", version, about)]
struct Args {
    /// Path to the pipeline configuration YAML.
    config: PathBuf,

    /// Whether to generate a finite batch as fast as possible, or release events at their
    /// wall-clock value.
    #[arg(long, value_enum, default_value = "sample")]
    mode: RunMode,

    /// Log verbosity, passed through to `tracing-subscriber`'s env filter as the default.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RunMode {
    Sample,
    Live,
}

impl From<RunMode> for Mode {
    fn from(mode: RunMode) -> Self {
        match mode {
            RunMode::Sample => Mode::Sample,
            RunMode::Live => Mode::Live,
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    let runtime = Runtime::new(config);
    match runtime.run(args.mode.into()).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "pipeline exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}
