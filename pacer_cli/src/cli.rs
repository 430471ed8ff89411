//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "pacer", version, about = "Treadmill workout runner")]
pub struct Cli {
    /// Path to config TOML (built-in defaults when omitted)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Persisted calibration TOML (as written by `fit --write`); replaces [calibration]
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Print events and logs as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides RUST_LOG and [logging] level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Direction of a `convert` request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConvertTo {
    /// Adjusted (true) km/h to the raw value the treadmill is sent
    Raw,
    /// Raw treadmill km/h to adjusted (true) km/h
    Adjusted,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the flattened execution sequence of a workout
    Plan {
        /// Workout TOML
        #[arg(long, value_name = "FILE")]
        workout: PathBuf,
    },
    /// Execute a workout against the simulated treadmill and athlete
    Run {
        /// Workout TOML
        #[arg(long, value_name = "FILE")]
        workout: PathBuf,
        /// Override runner.tick_hz
        #[arg(long, value_name = "N")]
        ticks_per_second: Option<u32>,
        /// Run on the wall clock instead of simulated time
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Run on the wall clock instead of simulated time.\n\nWithout this flag the run uses a simulated clock that advances one tick period per loop, so an hour-long workout finishes in well under a second. Sampler mode (runner.mode = \"sampler\") only applies with --realtime."
        )]
        realtime: bool,
        /// Write the run's reference-speed samples as CSV
        #[arg(long, value_name = "FILE")]
        samples_out: Option<PathBuf>,
    },
    /// Fit a calibration from a samples CSV (raw_speed,reference_speed,run_id)
    Fit {
        #[arg(long, value_name = "FILE")]
        samples: PathBuf,
        /// Highest polynomial degree to try (1..=3); defaults to regression.max_degree
        #[arg(long, value_name = "N")]
        degree: Option<u8>,
        /// Persist the resulting calibration TOML (written atomically)
        #[arg(long, value_name = "FILE")]
        write: Option<PathBuf>,
    },
    /// Convert a speed through the configured calibration
    Convert {
        /// Speed in km/h
        #[arg(long, value_name = "KMH", allow_negative_numbers = true)]
        speed: f64,
        #[arg(long, value_enum, default_value = "raw")]
        to: ConvertTo,
    },
}
