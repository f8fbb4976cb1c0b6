//! Stage entry point for the graph builder: build once and log a summary.

use anyhow::Result;
use clap::Parser;
use dallas_roadnet::network::{self, WeightMode};
use dallas_roadnet::DataPaths;
use tracing::info;

#[derive(Parser)]
#[command(name = "build_network")]
#[command(about = "Build the directed weighted road network graph", long_about = None)]
struct Cli {
    /// Base data directory containing raw/ and processed/
    #[arg(long, default_value = "data")]
    data_dir: String,

    /// Edge weighting mode (freeflow, congested, am, midday, pm, evening)
    #[arg(long, default_value = "am")]
    mode: String,
}

fn main() -> Result<()> {
    dallas_roadnet::init_tracing();
    let cli = Cli::parse();

    let mode: WeightMode = cli.mode.parse()?;
    let graph = network::load_and_build(&DataPaths::new(&cli.data_dir), mode)?;

    info!(
        "network ready: {} intersections, {} road segments, weighted by '{}'",
        graph.node_count(),
        graph.edge_count(),
        mode.column()
    );
    Ok(())
}
