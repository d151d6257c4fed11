use clap::Parser;
use std::path::PathBuf;

/// Price-spike monitor for Opinion prediction markets
#[derive(Debug, Parser)]
#[command(name = "spikewatch", version, about)]
pub struct Cli {
    /// Directory holding default.toml and environment overrides
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Run a single monitoring cycle and exit
    #[arg(long)]
    pub once: bool,
}
