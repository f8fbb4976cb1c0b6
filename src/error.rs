use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataframe error: {0}")]
    DataFrame(#[from] polars::error::PolarsError),
    #[error("missing input file {}: {hint}", .path.display())]
    MissingInput { path: PathBuf, hint: &'static str },
    #[error("missing required column '{0}'")]
    MissingColumn(String),
    #[error("unknown weighting mode '{0}' (expected freeflow, congested, am, midday, pm or evening)")]
    UnknownWeightMode(String),
    #[error("unknown partition method '{0}' (expected louvain or girvan-newman)")]
    UnknownPartitionMethod(String),
    #[error("graph is empty")]
    EmptyGraph,
}

pub type Result<T> = std::result::Result<T, Error>;
