//! Command-line interface

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Read-only gateway in front of the CRM unit inventory
#[derive(Parser, Debug)]
#[command(name = "units-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "UNITS_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "UNITS_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "UNITS_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "UNITS_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "UNITS_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Run one query against the backend and print the envelope
    Query {
        /// What to fetch
        #[arg(value_enum)]
        target: QueryTarget,

        /// Skip the cache read
        #[arg(long)]
        refresh: bool,
    },
}

/// Query handlers reachable from the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryTarget {
    /// Recent unit records
    Units,
    /// Unit field metadata
    Describe,
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Units => f.write_str("units"),
            Self::Describe => f.write_str("describe"),
        }
    }
}
