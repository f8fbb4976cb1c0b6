//! Directed weighted graph construction from the processed node and link
//! tables. One node per intersection, one directed edge per link row; the
//! active weighting mode decides which travel-time column becomes the
//! scalar edge weight. Every call rebuilds the graph from the tables, there
//! is no caching.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{DataPaths, Error, Result, PROCESSED_LINKS, PROCESSED_NODES};

/// Selector for the edge-weight column. Exactly one mode is active per
/// graph build; changing mode means rebuilding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightMode {
    FreeFlow,
    Congested,
    Am,
    Midday,
    Pm,
    Evening,
}

impl WeightMode {
    /// Link-table column backing this mode.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            WeightMode::FreeFlow => "freeflow_time",
            WeightMode::Congested => "congested_time",
            WeightMode::Am => "travel_time_AM",
            WeightMode::Midday => "travel_time_Midday",
            WeightMode::Pm => "travel_time_PM",
            WeightMode::Evening => "travel_time_Evening",
        }
    }
}

impl FromStr for WeightMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "freeflow" | "free-flow" => Ok(WeightMode::FreeFlow),
            "congested" => Ok(WeightMode::Congested),
            "am" | "morning" => Ok(WeightMode::Am),
            "midday" => Ok(WeightMode::Midday),
            "pm" | "afternoon" => Ok(WeightMode::Pm),
            "evening" => Ok(WeightMode::Evening),
            _ => Err(Error::UnknownWeightMode(s.to_string())),
        }
    }
}

impl fmt::Display for WeightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeightMode::FreeFlow => "freeflow",
            WeightMode::Congested => "congested",
            WeightMode::Am => "am",
            WeightMode::Midday => "midday",
            WeightMode::Pm => "pm",
            WeightMode::Evening => "evening",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "Node_ID")]
    pub node_id: i64,
    #[serde(rename = "Lon")]
    pub lon: f64,
    #[serde(rename = "Lat")]
    pub lat: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRecord {
    #[serde(rename = "Link_ID")]
    pub link_id: i64,
    #[serde(rename = "From_Node_ID")]
    pub from_node_id: i64,
    #[serde(rename = "To_Node_ID")]
    pub to_node_id: i64,
    #[serde(rename = "Length")]
    pub length: f64,
    pub freeflow_time: f64,
    #[serde(default)]
    pub congested_time: Option<f64>,
    #[serde(rename = "travel_time_AM", default)]
    pub travel_time_am: Option<f64>,
    #[serde(rename = "travel_time_Midday", default)]
    pub travel_time_midday: Option<f64>,
    #[serde(rename = "travel_time_PM", default)]
    pub travel_time_pm: Option<f64>,
    #[serde(rename = "travel_time_Evening", default)]
    pub travel_time_evening: Option<f64>,
}

impl LinkRecord {
    fn value_for(&self, mode: WeightMode) -> Option<f64> {
        match mode {
            WeightMode::FreeFlow => Some(self.freeflow_time),
            WeightMode::Congested => self.congested_time,
            WeightMode::Am => self.travel_time_am,
            WeightMode::Midday => self.travel_time_midday,
            WeightMode::Pm => self.travel_time_pm,
            WeightMode::Evening => self.travel_time_evening,
        }
    }
}

/// Decoded link rows plus the CSV header, kept so a build can tell a column
/// that is absent from one that is merely null on some rows.
#[derive(Debug)]
pub struct LinkTable {
    pub records: Vec<LinkRecord>,
    pub columns: Vec<String>,
}

impl LinkTable {
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

#[derive(Debug, Clone)]
pub struct Intersection {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone)]
pub struct RoadSegment {
    pub link_id: i64,
    pub length: f64,
    pub freeflow_time: f64,
    pub congested_time: Option<f64>,
    pub travel_time_am: Option<f64>,
    pub travel_time_midday: Option<f64>,
    pub travel_time_pm: Option<f64>,
    pub travel_time_evening: Option<f64>,
    /// Value of the active mode's column for this link.
    pub weight: f64,
}

pub type RoadNetwork = DiGraph<Intersection, RoadSegment>;

fn decode_rows<T, R>(reader: R) -> Result<(Vec<T>, Vec<String>, usize)>
where
    T: DeserializeOwned,
    R: std::io::Read,
{
    let mut csv_reader = csv::Reader::from_reader(reader);
    let columns = csv_reader.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in csv_reader.deserialize() {
        match row {
            Ok(record) => records.push(record),
            Err(_) => skipped += 1,
        }
    }

    Ok((records, columns, skipped))
}

fn require_file(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(Error::MissingInput {
            path: path.to_path_buf(),
            hint: "run the preprocessing stage first",
        });
    }
    Ok(File::open(path)?)
}

pub fn load_nodes(path: &Path) -> Result<Vec<NodeRecord>> {
    let file = require_file(path)?;
    let (records, _, skipped) = decode_rows::<NodeRecord, _>(file)?;
    if skipped > 0 {
        warn!("skipped {} malformed node rows", skipped);
    }
    info!("loaded {} nodes from {}", records.len(), path.display());
    Ok(records)
}

pub fn load_links(path: &Path) -> Result<LinkTable> {
    let file = require_file(path)?;
    let (records, columns, skipped) = decode_rows::<LinkRecord, _>(file)?;
    if skipped > 0 {
        warn!("skipped {} malformed link rows", skipped);
    }
    info!("loaded {} links from {}", records.len(), path.display());
    Ok(LinkTable { records, columns })
}

pub fn load_processed(paths: &DataPaths) -> Result<(Vec<NodeRecord>, LinkTable)> {
    let nodes = load_nodes(&paths.processed_file(PROCESSED_NODES))?;
    let links = load_links(&paths.processed_file(PROCESSED_LINKS))?;
    Ok((nodes, links))
}

/// Materialize the directed graph with the given weighting mode.
///
/// # Errors
///
/// Returns [`Error::MissingColumn`] when the mode's column is not in the
/// link table, e.g. a time-of-day mode requested before the temporal
/// synthesis stage has run. There is no silent fallback to another column.
pub fn build_graph(
    nodes: &[NodeRecord],
    links: &LinkTable,
    mode: WeightMode,
) -> Result<RoadNetwork> {
    let column = mode.column();
    if !links.has_column(column) {
        return Err(Error::MissingColumn(column.to_string()));
    }
    info!("building graph using '{}' as the edge weight", column);

    let mut graph = RoadNetwork::new();
    let mut index: HashMap<i64, NodeIndex> = HashMap::new();

    for node in nodes {
        index.entry(node.node_id).or_insert_with(|| {
            graph.add_node(Intersection {
                id: node.node_id,
                lon: node.lon,
                lat: node.lat,
            })
        });
    }

    let mut missing_endpoints = 0usize;
    let mut missing_weights = 0usize;
    for link in &links.records {
        let (Some(&from), Some(&to)) = (
            index.get(&link.from_node_id),
            index.get(&link.to_node_id),
        ) else {
            missing_endpoints += 1;
            continue;
        };

        let Some(weight) = link
            .value_for(mode)
            .filter(|w| w.is_finite() && *w > 0.0)
        else {
            missing_weights += 1;
            continue;
        };

        graph.add_edge(
            from,
            to,
            RoadSegment {
                link_id: link.link_id,
                length: link.length,
                freeflow_time: link.freeflow_time,
                congested_time: link.congested_time,
                travel_time_am: link.travel_time_am,
                travel_time_midday: link.travel_time_midday,
                travel_time_pm: link.travel_time_pm,
                travel_time_evening: link.travel_time_evening,
                weight,
            },
        );
    }

    info!(
        "graph build complete: {} nodes, {} edges",
        graph.node_count(),
        graph.edge_count()
    );
    if missing_endpoints > 0 {
        warn!(
            "{} links skipped due to endpoints missing from the node table",
            missing_endpoints
        );
    }
    if missing_weights > 0 {
        warn!(
            "{} links skipped due to missing or non-positive weights",
            missing_weights
        );
    }

    Ok(graph)
}

/// Load the processed tables and build the graph in one call.
pub fn load_and_build(paths: &DataPaths, mode: WeightMode) -> Result<RoadNetwork> {
    let (nodes, links) = load_processed(paths)?;
    build_graph(&nodes, &links, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> NodeRecord {
        NodeRecord {
            node_id: id,
            lon: -96.8 - id as f64 * 0.01,
            lat: 32.78 + id as f64 * 0.01,
        }
    }

    fn link(link_id: i64, from: i64, to: i64, freeflow: f64) -> LinkRecord {
        LinkRecord {
            link_id,
            from_node_id: from,
            to_node_id: to,
            length: 1.0,
            freeflow_time: freeflow,
            congested_time: Some(freeflow * 2.0),
            travel_time_am: Some(freeflow * 1.8),
            travel_time_midday: Some(freeflow * 1.4),
            travel_time_pm: Some(freeflow * 1.9),
            travel_time_evening: Some(freeflow * 1.2),
        }
    }

    fn temporal_columns() -> Vec<String> {
        [
            "Link_ID",
            "From_Node_ID",
            "To_Node_ID",
            "Length",
            "freeflow_time",
            "congested_time",
            "travel_time_AM",
            "travel_time_Midday",
            "travel_time_PM",
            "travel_time_Evening",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    #[test]
    fn parses_weight_modes() {
        assert_eq!("am".parse::<WeightMode>().unwrap(), WeightMode::Am);
        assert_eq!(
            "freeflow".parse::<WeightMode>().unwrap(),
            WeightMode::FreeFlow
        );
        assert!(matches!(
            "rush_hour".parse::<WeightMode>(),
            Err(Error::UnknownWeightMode(_))
        ));
    }

    #[test]
    fn node_and_edge_counts_match_the_tables() {
        let nodes = vec![node(1), node(2), node(3), node(2)]; // one duplicate id
        let links = LinkTable {
            records: vec![link(10, 1, 2, 1.0), link(11, 2, 3, 2.0), link(12, 3, 1, 3.0)],
            columns: temporal_columns(),
        };

        let graph = build_graph(&nodes, &links, WeightMode::Congested).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn edge_weight_tracks_the_selected_mode() {
        let nodes = vec![node(1), node(2)];
        let links = LinkTable {
            records: vec![link(10, 1, 2, 1.0)],
            columns: temporal_columns(),
        };

        for (mode, expected) in [
            (WeightMode::FreeFlow, 1.0),
            (WeightMode::Congested, 2.0),
            (WeightMode::Am, 1.8),
            (WeightMode::Midday, 1.4),
            (WeightMode::Pm, 1.9),
            (WeightMode::Evening, 1.2),
        ] {
            let graph = build_graph(&nodes, &links, mode).unwrap();
            let segment = graph.edge_weights().next().unwrap();
            assert_eq!(segment.weight, expected, "mode {mode}");
        }
    }

    #[test]
    fn temporal_mode_before_synthesis_is_a_configuration_error() {
        let nodes = vec![node(1), node(2)];
        let links = LinkTable {
            records: vec![link(10, 1, 2, 1.0)],
            columns: [
                "Link_ID",
                "From_Node_ID",
                "To_Node_ID",
                "Length",
                "freeflow_time",
                "congested_time",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        };

        let err = build_graph(&nodes, &links, WeightMode::Am).unwrap_err();
        assert!(matches!(err, Error::MissingColumn(col) if col == "travel_time_AM"));

        // the non-temporal modes still build
        assert!(build_graph(&nodes, &links, WeightMode::Congested).is_ok());
    }

    #[test]
    fn edges_with_unknown_endpoints_are_skipped() {
        let nodes = vec![node(1), node(2)];
        let links = LinkTable {
            records: vec![link(10, 1, 2, 1.0), link(11, 2, 9, 2.0)],
            columns: temporal_columns(),
        };

        let graph = build_graph(&nodes, &links, WeightMode::FreeFlow).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn parallel_links_are_kept_as_parallel_edges() {
        let nodes = vec![node(1), node(2)];
        let links = LinkTable {
            records: vec![link(10, 1, 2, 1.0), link(11, 1, 2, 4.0)],
            columns: temporal_columns(),
        };

        let graph = build_graph(&nodes, &links, WeightMode::FreeFlow).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn malformed_rows_are_dropped_during_decode() {
        let data = "\
Node_ID,Lon,Lat
1,-96.80,32.78
oops,not,numeric
2,-96.81,32.79
";
        let (records, columns, skipped) =
            decode_rows::<NodeRecord, _>(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
        assert_eq!(columns, vec!["Node_ID", "Lon", "Lat"]);
    }
}
