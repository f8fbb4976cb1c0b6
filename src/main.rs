//! One-shot batch run of the whole pipeline: preprocessing, temporal
//! synthesis, then centrality and community analysis on the built graph.

use anyhow::Result;
use clap::Parser;
use dallas_roadnet::community::PartitionMethod;
use dallas_roadnet::network::WeightMode;
use dallas_roadnet::{centrality, community, preprocessing, temporal, DataPaths};

#[derive(Parser)]
#[command(name = "dallas-roadnet")]
#[command(about = "Graph analysis of the Dallas road-network snapshot", long_about = None)]
struct Cli {
    /// Base data directory containing raw/ and processed/
    #[arg(long, default_value = "data")]
    data_dir: String,

    /// Edge weighting mode for the analysis stages
    #[arg(long, default_value = "congested")]
    mode: String,

    /// Community detection method (louvain or girvan-newman)
    #[arg(long, default_value = "louvain")]
    method: String,

    /// Node cap for the Girvan-Newman subgraph sample
    #[arg(long, default_value_t = 1500)]
    gn_max_nodes: usize,
}

fn main() -> Result<()> {
    dallas_roadnet::init_tracing();
    let cli = Cli::parse();

    let paths = DataPaths::new(&cli.data_dir);
    let mode: WeightMode = cli.mode.parse()?;
    let method: PartitionMethod = cli.method.parse()?;

    preprocessing::run_preprocessing(&paths)?;
    temporal::run_temporal_preprocessing(&paths)?;
    centrality::run_centrality_analysis(&paths, mode)?;
    community::run_community_detection(&paths, mode, method, cli.gn_max_nodes)?;

    Ok(())
}
