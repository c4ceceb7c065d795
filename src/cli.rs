//! Command-line arguments.

use clap::{Parser, ValueEnum};

/// Output format for tracing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable output for local development.
    Pretty,
    /// Newline-delimited JSON for log aggregators.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "icetrack", version, about = "DDR score tracker and ranking scraper")]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty)]
    pub tracing: TracingFormat,
}
