//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls the summary format).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "boostctl", version, about = "Electronic boost controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/boostctl.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Boot the controller against the simulated rig and run the loop
    Run {
        /// Stop after this many milliseconds (runs until Ctrl-C otherwise)
        #[arg(long, value_name = "MS")]
        duration_ms: Option<u64>,

        /// Simulated vehicle speed reported by the master (km/h)
        #[arg(long, value_name = "KPH", default_value_t = 90.0)]
        speed_kph: f32,

        /// Simulated engine speed reported by the master
        #[arg(long, value_name = "RPM", default_value_t = 4500)]
        rpm: i32,

        /// Simulated gear reported by the master (0 = neutral)
        #[arg(long, default_value_t = 3)]
        gear: i32,

        /// Boost the simulated engine makes with the valve closed (raw counts)
        #[arg(long, value_name = "COUNTS", default_value_t = 200.0)]
        load_raw: f32,

        /// Master never transmits (demonstrates the comms-loss latch)
        #[arg(long, action = ArgAction::SetTrue)]
        silent_master: bool,
    },

    /// Home the simulated valve and print the travel limits
    Calibrate,

    /// Parse and validate the config file, then exit
    CheckConfig,
}
