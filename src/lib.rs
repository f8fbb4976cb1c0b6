//! Graph analysis of a static Dallas road-network snapshot.
//!
//! The pipeline turns raw node/link/flow tables into a directed weighted
//! graph and ranks intersections by centrality and congestion cluster.
//! Stages run strictly downstream of each other and communicate through
//! CSV files only:
//!
//! raw tables -> preprocessing -> temporal synthesis -> graph build
//! -> { centrality, community detection }
//!
//! Execution order is the operator's responsibility; running a stage before
//! its upstream stage fails with a missing-file or missing-column error.

pub mod centrality;
pub mod community;
pub mod error;
pub mod network;
pub mod preprocessing;
pub mod temporal;

use std::path::{Path, PathBuf};

pub use error::{Error, Result};

pub const RAW_NODES: &str = "Dallas_node.csv";
pub const RAW_LINKS: &str = "Dallas_link.csv";
pub const RAW_LINKFLOWS: &str = "LinkFlows.csv";
pub const RAW_OD: &str = "Dallas_od.csv";

pub const PROCESSED_NODES: &str = "processed_nodes.csv";
pub const PROCESSED_LINKS: &str = "processed_links.csv";
pub const PROCESSED_LINKS_BACKUP: &str = "processed_links_backup.csv";
pub const PROCESSED_OD: &str = "processed_od.csv";
pub const CENTRALITY_RANKINGS: &str = "centrality_rankings.csv";
pub const COMMUNITIES: &str = "communities.csv";

/// Fixed path convention for the pipeline: `data/raw` inputs and
/// `data/processed` outputs, relative to the working directory unless a
/// different base is supplied.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub raw: PathBuf,
    pub processed: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new("data")
    }
}

impl DataPaths {
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            raw: base.join("raw"),
            processed: base.join("processed"),
        }
    }

    #[must_use]
    pub fn raw_file(&self, name: &str) -> PathBuf {
        self.raw.join(name)
    }

    #[must_use]
    pub fn processed_file(&self, name: &str) -> PathBuf {
        self.processed.join(name)
    }
}

/// Stderr logging for the stage binaries. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
