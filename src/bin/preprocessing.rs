//! Stage entry point for the record normalizer.

use anyhow::Result;
use clap::Parser;
use dallas_roadnet::{preprocessing, DataPaths};

#[derive(Parser)]
#[command(name = "preprocessing")]
#[command(about = "Clean the raw Dallas road-network tables", long_about = None)]
struct Cli {
    /// Base data directory containing raw/ and processed/
    #[arg(long, default_value = "data")]
    data_dir: String,
}

fn main() -> Result<()> {
    dallas_roadnet::init_tracing();
    let cli = Cli::parse();

    preprocessing::run_preprocessing(&DataPaths::new(&cli.data_dir))?;
    Ok(())
}
