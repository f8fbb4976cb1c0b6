//! Stage entry point for the community partitioner.
//!
//! Louvain is the default; the Girvan-Newman alternative must be selected
//! explicitly with `--method girvan-newman`.

use anyhow::Result;
use clap::Parser;
use dallas_roadnet::community::{self, PartitionMethod};
use dallas_roadnet::network::WeightMode;
use dallas_roadnet::DataPaths;

#[derive(Parser)]
#[command(name = "community_detection")]
#[command(about = "Assign intersections to congestion communities", long_about = None)]
struct Cli {
    /// Base data directory containing raw/ and processed/
    #[arg(long, default_value = "data")]
    data_dir: String,

    /// Edge weighting mode (freeflow, congested, am, midday, pm, evening)
    #[arg(long, default_value = "congested")]
    mode: String,

    /// Partition method (louvain or girvan-newman)
    #[arg(long, default_value = "louvain")]
    method: String,

    /// Node cap for the Girvan-Newman subgraph sample
    #[arg(long, default_value_t = 1500)]
    gn_max_nodes: usize,
}

fn main() -> Result<()> {
    dallas_roadnet::init_tracing();
    let cli = Cli::parse();

    let mode: WeightMode = cli.mode.parse()?;
    let method: PartitionMethod = cli.method.parse()?;
    community::run_community_detection(
        &DataPaths::new(&cli.data_dir),
        mode,
        method,
        cli.gn_max_nodes,
    )?;
    Ok(())
}
