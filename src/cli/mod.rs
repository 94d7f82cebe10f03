//! Command-line interface

mod runner;

pub use runner::run;

use clap::Parser;
use std::path::PathBuf;

/// Incremental extraction tap for Salesforce-style REST APIs
#[derive(Debug, Parser)]
#[command(name = "forcetap", version, about)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the JSON state file; omit for a fresh, unpersisted run
    #[arg(short, long)]
    pub state: Option<PathBuf>,

    /// Sync only this table from the catalog
    #[arg(long)]
    pub table: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
