//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Steward Gateway - auth and protocol gateway for git-backed project management
#[derive(Parser, Debug)]
#[command(name = "steward-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "STEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "STEWARD_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "STEWARD_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "STEWARD_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "STEWARD_LOG_FORMAT")]
    pub log_format: Option<String>,
}
