//! Stage entry point for the centrality reporter.

use anyhow::Result;
use clap::Parser;
use dallas_roadnet::network::WeightMode;
use dallas_roadnet::{centrality, DataPaths};

#[derive(Parser)]
#[command(name = "centrality_analysis")]
#[command(about = "Rank intersections by degree, betweenness and eigenvector centrality", long_about = None)]
struct Cli {
    /// Base data directory containing raw/ and processed/
    #[arg(long, default_value = "data")]
    data_dir: String,

    /// Edge weighting mode (freeflow, congested, am, midday, pm, evening)
    #[arg(long, default_value = "congested")]
    mode: String,
}

fn main() -> Result<()> {
    dallas_roadnet::init_tracing();
    let cli = Cli::parse();

    let mode: WeightMode = cli.mode.parse()?;
    centrality::run_centrality_analysis(&DataPaths::new(&cli.data_dir), mode)?;
    Ok(())
}
