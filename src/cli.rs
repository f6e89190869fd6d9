//! Command-line interface definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::web::Layout;

/// XML to spreadsheet upload-and-convert server
#[derive(Debug, Parser)]
#[command(name = "xml2xlsx-server", version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Show converter and configuration information
    Info,
}

/// Arguments for `serve`
///
/// Every flag is optional; unset flags fall back to the config file, then to
/// built-in defaults.
#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding uploads and converter output
    #[arg(short, long)]
    pub work_dir: Option<PathBuf>,

    /// Converter program to run for each upload
    #[arg(long)]
    pub converter: Option<String>,

    /// Converter timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Maximum upload size in MB
    #[arg(long)]
    pub upload_limit: Option<usize>,

    /// Working directory layout
    #[arg(long, value_enum)]
    pub layout: Option<Layout>,

    /// Number of runtime worker threads
    #[arg(long)]
    pub workers: Option<usize>,

    /// Report success on converter exit 0 without checking the output file
    #[arg(long)]
    pub no_verify: bool,
}
