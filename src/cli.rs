//! Command-line interface definition for stampede
//!
//! This module defines the CLI structure using clap's derive API. All
//! runtime parameters of a run come from here: the target rate, the
//! traffic window, the statistics period, and the script and output
//! locations.

use clap::Parser;
use std::path::PathBuf;

/// stampede - scripted HTTP/2 load generator
///
/// Drives the message flow declared in a traffic script against a remote
/// HTTP/2 endpoint at a fixed request rate, collecting per-message
/// latencies and response statistics.
#[derive(Parser, Debug, Clone)]
#[command(name = "stampede")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Requests per second
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub rate: u32,

    /// Time to run traffic, in seconds
    #[arg(short = 't', long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,

    /// Print and save statistics every this many seconds
    #[arg(short = 'p', long = "period", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub period: u64,

    /// Path to the traffic script definition
    #[arg(short = 'f', long = "script", default_value = "/etc/scripts/traffic.json")]
    pub script: PathBuf,

    /// Output file prefix for the statistics artifacts
    #[arg(short, long, default_value = "stampede.out")]
    pub output: String,

    /// Print the schema for the traffic script definition and exit
    #[arg(short = 's', long = "show-schema")]
    pub show_schema: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
