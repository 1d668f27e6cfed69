//! CLI argument definitions for the driftwatch daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use driftwatch_core::config::DriftwatchConfig;

/// Driftwatch metrics anomaly detector.
///
/// Accepts metric samples over TCP, scores monitored series against
/// their smoothed baseline, and reports anomalies.
#[derive(Parser, Debug)]
#[command(name = "driftwatch")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to driftwatch.toml configuration file.
    #[arg(short, long, default_value = "/etc/driftwatch/driftwatch.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file, print the effective configuration, and exit.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut DriftwatchConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
    }
}
