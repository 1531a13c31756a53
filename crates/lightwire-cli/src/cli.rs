//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lightwire_core::OutputFormat;

/// lightwire - ambient light sensor controller
#[derive(Debug, Parser)]
#[command(name = "lightwire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "LIGHTWIRE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Output events (and port lists) as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Returns the output format, preferring the flag over the file setting.
    pub fn output_format(&self, config_json: bool) -> OutputFormat {
        if self.json || config_json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll the sensor and print readings and alerts (default)
    Run(RunArgs),

    /// List serial ports
    Ports,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides for `lightwire run`. Unset flags fall back to the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Serial device path
    #[arg(long, short, env = "LIGHTWIRE_DEVICE")]
    pub device: Option<String>,

    /// Baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// How long to wait for a reading before resending the query
    #[arg(long, value_name = "MS")]
    pub response_timeout_ms: Option<u64>,

    /// Resends before giving up on a silent device
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Readings below this raise "Low Light"
    #[arg(long, allow_hyphen_values = true)]
    pub low: Option<i16>,

    /// Readings above this raise "High Light"
    #[arg(long, allow_hyphen_values = true)]
    pub high: Option<i16>,

    /// Print alerts only, not every reading
    #[arg(long)]
    pub no_readings: bool,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Dump,

    /// Validate the configuration
    Validate,

    /// Show the configuration file path
    Path,
}
