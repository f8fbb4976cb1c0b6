//! Stage entry point for the temporal synthesizer.

use anyhow::Result;
use clap::Parser;
use dallas_roadnet::{temporal, DataPaths};

#[derive(Parser)]
#[command(name = "temporal_preprocessing")]
#[command(
    about = "Derive synthetic time-of-day travel times for the processed links",
    long_about = None
)]
struct Cli {
    /// Base data directory containing raw/ and processed/
    #[arg(long, default_value = "data")]
    data_dir: String,
}

fn main() -> Result<()> {
    dallas_roadnet::init_tracing();
    let cli = Cli::parse();

    temporal::run_temporal_preprocessing(&DataPaths::new(&cli.data_dir))?;
    Ok(())
}
