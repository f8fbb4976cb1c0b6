//! Community detection over the road network: Louvain modularity
//! optimization as the primary method, with a divisive Girvan-Newman
//! split as the alternative for small (or top-degree-sampled) subgraphs.
//!
//! On this snapshot the modularity optimizer is unreliable: large parts of
//! the network carry near-uniform travel times and the partition can
//! collapse into a handful of giant communities. The root cause is
//! unconfirmed, so the Girvan-Newman path stays available as a documented
//! alternative and nothing switches methods automatically; the choice is
//! the operator's.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::{info, warn};

use crate::network::{load_and_build, RoadNetwork, WeightMode};
use crate::{DataPaths, Error, Result, COMMUNITIES};

const MOVE_GAIN_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMethod {
    Louvain,
    GirvanNewman,
}

impl FromStr for PartitionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "louvain" => Ok(PartitionMethod::Louvain),
            "girvan-newman" | "girvan_newman" | "gn" => Ok(PartitionMethod::GirvanNewman),
            _ => Err(Error::UnknownPartitionMethod(s.to_string())),
        }
    }
}

impl fmt::Display for PartitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionMethod::Louvain => write!(f, "louvain"),
            PartitionMethod::GirvanNewman => write!(f, "girvan-newman"),
        }
    }
}

/// Undirected projection of the directed graph. Reciprocal and parallel
/// edge weights are summed so the projection is order-independent.
struct UndirectedProjection {
    adj: Vec<Vec<(usize, f64)>>,
    total_weight: f64,
}

fn undirected_projection(graph: &RoadNetwork) -> UndirectedProjection {
    let n = graph.node_count();
    let mut edge_weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for edge in graph.edge_references() {
        let (mut a, mut b) = (edge.source().index(), edge.target().index());
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        *edge_weights.entry((a, b)).or_insert(0.0) += edge.weight().weight;
    }

    let mut adj = vec![Vec::new(); n];
    let mut total_weight = 0.0;
    for (&(a, b), &w) in &edge_weights {
        total_weight += w;
        if a == b {
            adj[a].push((a, w));
        } else {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
    }

    UndirectedProjection { adj, total_weight }
}

// Weighted degree; self-loops count twice.
fn weighted_degrees(adj: &[Vec<(usize, f64)>]) -> Vec<f64> {
    adj.iter()
        .enumerate()
        .map(|(i, nbrs)| {
            nbrs.iter()
                .map(|&(j, w)| if j == i { 2.0 * w } else { w })
                .sum()
        })
        .collect()
}

/// One local-moving pass: greedily move nodes (in index order, no RNG)
/// into the neighboring community with the best modularity gain.
fn one_level(adj: &[Vec<(usize, f64)>], m: f64) -> (Vec<usize>, bool) {
    let n = adj.len();
    let k = weighted_degrees(adj);
    let mut community: Vec<usize> = (0..n).collect();
    let mut sigma_tot = k.clone();
    let two_m = 2.0 * m;
    let mut improved = false;

    loop {
        let mut moved = false;
        for i in 0..n {
            let current = community[i];

            let mut weights: BTreeMap<usize, f64> = BTreeMap::new();
            for &(j, w) in &adj[i] {
                if j == i {
                    continue;
                }
                *weights.entry(community[j]).or_insert(0.0) += w;
            }

            sigma_tot[current] -= k[i];

            let stay_weight = weights.get(&current).copied().unwrap_or(0.0);
            let mut best_community = current;
            let mut best_gain = stay_weight - sigma_tot[current] * k[i] / two_m;
            for (&candidate, &weight_in) in &weights {
                if candidate == current {
                    continue;
                }
                let gain = weight_in - sigma_tot[candidate] * k[i] / two_m;
                if gain > best_gain + MOVE_GAIN_EPS {
                    best_gain = gain;
                    best_community = candidate;
                }
            }

            sigma_tot[best_community] += k[i];
            community[i] = best_community;
            if best_community != current {
                moved = true;
                improved = true;
            }
        }
        if !moved {
            break;
        }
    }

    (community, improved)
}

// Relabel to 0..k in first-appearance order.
fn renumber(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let mut renumbered = Vec::with_capacity(labels.len());
    for &label in labels {
        let next = mapping.len();
        let id = *mapping.entry(label).or_insert(next);
        renumbered.push(id);
    }
    let count = mapping.len();
    (renumbered, count)
}

/// Collapse each community into one node; intra-community edges become
/// self-loops carrying the summed internal weight.
fn aggregate(adj: &[Vec<(usize, f64)>], community: &[usize], k: usize) -> Vec<Vec<(usize, f64)>> {
    let mut edges: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, nbrs) in adj.iter().enumerate() {
        for &(j, w) in nbrs {
            if j < i {
                continue; // each undirected edge once; self-loops have j == i
            }
            let (mut a, mut b) = (community[i], community[j]);
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            *edges.entry((a, b)).or_insert(0.0) += w;
        }
    }

    let mut result = vec![Vec::new(); k];
    for (&(a, b), &w) in &edges {
        if a == b {
            result[a].push((a, w));
        } else {
            result[a].push((b, w));
            result[b].push((a, w));
        }
    }
    result
}

/// Louvain partition of the undirected projection. Deterministic: node
/// order replaces the usual random shuffle, so identical graphs give
/// identical partitions.
#[must_use]
pub fn louvain_partition(graph: &RoadNetwork) -> Vec<usize> {
    let projection = undirected_projection(graph);
    let n = projection.adj.len();
    if n == 0 {
        return Vec::new();
    }
    let m = projection.total_weight;
    if m <= 0.0 {
        // no edges: every node is its own community
        return (0..n).collect();
    }

    let mut node_to_community: Vec<usize> = (0..n).collect();
    let mut level_adj = projection.adj;

    loop {
        let (assignment, improved) = one_level(&level_adj, m);
        if !improved {
            break;
        }
        let (renumbered, count) = renumber(&assignment);
        for slot in &mut node_to_community {
            *slot = renumbered[*slot];
        }
        if count == level_adj.len() {
            break;
        }
        level_adj = aggregate(&level_adj, &renumbered, count);
    }

    renumber(&node_to_community).0
}

/// Community sizes in descending order.
#[must_use]
pub fn community_sizes(partition: &[usize]) -> Vec<usize> {
    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for &label in partition {
        *sizes.entry(label).or_insert(0) += 1;
    }
    let mut list: Vec<usize> = sizes.into_values().collect();
    list.sort_unstable_by(|a, b| b.cmp(a));
    list
}

fn component_labels(adj: &[Vec<usize>]) -> (Vec<usize>, usize) {
    let n = adj.len();
    let mut labels = vec![usize::MAX; n];
    let mut count = 0;
    for start in 0..n {
        if labels[start] != usize::MAX {
            continue;
        }
        let mut queue = VecDeque::from([start]);
        labels[start] = count;
        while let Some(v) = queue.pop_front() {
            for &w in &adj[v] {
                if labels[w] == usize::MAX {
                    labels[w] = count;
                    queue.push_back(w);
                }
            }
        }
        count += 1;
    }
    (labels, count)
}

// Brandes accumulation per BFS tree, attributing flow to edges. The
// divisive split only needs the argmax, so the uniform doubling from
// counting both directions is irrelevant.
fn edge_betweenness(adj: &[Vec<usize>]) -> BTreeMap<(usize, usize), f64> {
    let n = adj.len();
    let mut scores: BTreeMap<(usize, usize), f64> = BTreeMap::new();

    for s in 0..n {
        let mut dist = vec![usize::MAX; n];
        let mut sigma = vec![0.0f64; n];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut order = Vec::with_capacity(n);

        dist[s] = 0;
        sigma[s] = 1.0;
        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            order.push(v);
            for &w in &adj[v] {
                if dist[w] == usize::MAX {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        for &w in order.iter().rev() {
            for &v in &preds[w] {
                let credit = sigma[v] / sigma[w] * (1.0 + delta[w]);
                let key = if v < w { (v, w) } else { (w, v) };
                *scores.entry(key).or_insert(0.0) += credit;
                delta[v] += credit;
            }
        }
    }

    scores
}

/// Divisive Girvan-Newman first split: remove highest-betweenness edges
/// until the component count increases. On graphs above `max_nodes` the
/// split runs on the top-degree sample only, and only sampled nodes get a
/// label.
#[must_use]
pub fn girvan_newman_split(
    graph: &RoadNetwork,
    max_nodes: usize,
) -> (Vec<NodeIndex>, Vec<usize>) {
    let mut nodes: Vec<NodeIndex> = graph.node_indices().collect();
    if nodes.len() > max_nodes {
        info!(
            "sampling the top {} nodes by degree for the Girvan-Newman split",
            max_nodes
        );
        nodes.sort_by_key(|&v| {
            let degree = graph.edges_directed(v, Direction::Outgoing).count()
                + graph.edges_directed(v, Direction::Incoming).count();
            (std::cmp::Reverse(degree), v.index())
        });
        nodes.truncate(max_nodes);
        nodes.sort_unstable();
    }

    let position: HashMap<NodeIndex, usize> =
        nodes.iter().enumerate().map(|(i, &v)| (v, i)).collect();

    // simple unweighted undirected adjacency over the sample
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for edge in graph.edge_references() {
        if let (Some(&a), Some(&b)) = (position.get(&edge.source()), position.get(&edge.target()))
        {
            if a != b && !adj[a].contains(&b) {
                adj[a].push(b);
                adj[b].push(a);
            }
        }
    }
    for list in &mut adj {
        list.sort_unstable();
    }

    let (labels, initial_count) = component_labels(&adj);
    let mut labels = labels;
    let edge_total: usize = adj.iter().map(Vec::len).sum::<usize>() / 2;

    for _ in 0..edge_total {
        let betweenness = edge_betweenness(&adj);
        let Some((&(a, b), _)) = betweenness
            .iter()
            .max_by(|x, y| x.1.partial_cmp(y.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            break;
        };

        adj[a].retain(|&v| v != b);
        adj[b].retain(|&v| v != a);

        let (new_labels, count) = component_labels(&adj);
        if count > initial_count {
            labels = new_labels;
            break;
        }
        labels = new_labels;
    }

    (nodes, labels)
}

/// Persist the node -> community assignment table.
pub fn save_communities(
    node_ids: &[i64],
    labels: &[usize],
    paths: &DataPaths,
) -> Result<PathBuf> {
    fs::create_dir_all(&paths.processed)?;
    let path = paths.processed_file(COMMUNITIES);

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["node_id", "community_id"])?;
    for (id, label) in node_ids.iter().zip(labels) {
        writer.write_record([id.to_string(), label.to_string()])?;
    }
    writer.flush()?;

    info!("community assignments saved to {}", path.display());
    Ok(path)
}

/// Full partitioner stage: build the graph, run the selected method and
/// persist the assignment table.
pub fn run_community_detection(
    paths: &DataPaths,
    mode: WeightMode,
    method: PartitionMethod,
    gn_max_nodes: usize,
) -> Result<()> {
    info!("building graph for community detection...");
    let graph = load_and_build(paths, mode)?;
    if graph.node_count() == 0 {
        return Err(Error::EmptyGraph);
    }

    let (node_ids, labels) = match method {
        PartitionMethod::Louvain => {
            info!("running Louvain community detection...");
            let partition = louvain_partition(&graph);
            let sizes = community_sizes(&partition);
            info!("detected {} communities via Louvain", sizes.len());
            info!(
                "largest communities (by size): {:?}",
                &sizes[..sizes.len().min(10)]
            );
            if sizes.len() <= 1 && graph.node_count() > 1 {
                warn!(
                    "Louvain collapsed the network into a single community; \
                     near-uniform edge weights are a known failure mode here, \
                     consider rerunning with the girvan-newman method"
                );
            }
            let ids: Vec<i64> = graph.node_indices().map(|v| graph[v].id).collect();
            (ids, partition)
        }
        PartitionMethod::GirvanNewman => {
            info!("running Girvan-Newman edge-betweenness split...");
            let (nodes, labels) = girvan_newman_split(&graph, gn_max_nodes);
            let sizes = community_sizes(&labels);
            info!(
                "Girvan-Newman split produced {} communities on {} nodes, sizes: {:?}",
                sizes.len(),
                nodes.len(),
                &sizes[..sizes.len().min(10)]
            );
            let ids: Vec<i64> = nodes.iter().map(|&v| graph[v].id).collect();
            (ids, labels)
        }
    };

    save_communities(&node_ids, &labels, paths)?;
    info!("community detection complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Intersection, RoadSegment};

    fn intersection(id: i64) -> Intersection {
        Intersection {
            id,
            lon: -96.8,
            lat: 32.78,
        }
    }

    fn segment(link_id: i64, weight: f64) -> RoadSegment {
        RoadSegment {
            link_id,
            length: 1.0,
            freeflow_time: weight,
            congested_time: Some(weight),
            travel_time_am: None,
            travel_time_midday: None,
            travel_time_pm: None,
            travel_time_evening: None,
            weight,
        }
    }

    fn triangle() -> RoadNetwork {
        let mut graph = RoadNetwork::new();
        let a = graph.add_node(intersection(1));
        let b = graph.add_node(intersection(2));
        let c = graph.add_node(intersection(3));
        graph.add_edge(a, b, segment(10, 1.0));
        graph.add_edge(b, c, segment(11, 2.0));
        graph.add_edge(c, a, segment(12, 3.0));
        graph
    }

    /// Two triangles joined by a single bridge edge.
    fn barbell() -> RoadNetwork {
        let mut graph = RoadNetwork::new();
        let nodes: Vec<_> = (0..6).map(|id| graph.add_node(intersection(id))).collect();
        let edges = [(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3), (2, 3)];
        for (i, &(a, b)) in edges.iter().enumerate() {
            graph.add_edge(nodes[a], nodes[b], segment(i as i64, 1.0));
        }
        graph
    }

    #[test]
    fn parses_partition_methods() {
        assert_eq!(
            "louvain".parse::<PartitionMethod>().unwrap(),
            PartitionMethod::Louvain
        );
        assert_eq!(
            "girvan-newman".parse::<PartitionMethod>().unwrap(),
            PartitionMethod::GirvanNewman
        );
        assert!(matches!(
            "kmeans".parse::<PartitionMethod>(),
            Err(Error::UnknownPartitionMethod(_))
        ));
    }

    #[test]
    fn triangle_is_a_single_community() {
        let graph = triangle();
        let partition = louvain_partition(&graph);
        assert_eq!(partition.len(), 3);
        assert!(partition.iter().all(|&c| c == partition[0]));
    }

    #[test]
    fn louvain_separates_the_barbell_triangles() {
        let graph = barbell();
        let partition = louvain_partition(&graph);

        assert_eq!(partition[0], partition[1]);
        assert_eq!(partition[1], partition[2]);
        assert_eq!(partition[3], partition[4]);
        assert_eq!(partition[4], partition[5]);
        assert_ne!(partition[0], partition[3]);
    }

    #[test]
    fn louvain_is_deterministic() {
        let graph = barbell();
        assert_eq!(louvain_partition(&graph), louvain_partition(&graph));
    }

    #[test]
    fn girvan_newman_first_split_removes_the_bridge() {
        let graph = barbell();
        let (nodes, labels) = girvan_newman_split(&graph, 1500);

        assert_eq!(nodes.len(), 6);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn girvan_newman_samples_top_degree_nodes() {
        let mut graph = barbell();
        // isolated low-degree straggler that the sample should drop
        graph.add_node(intersection(99));

        let (nodes, labels) = girvan_newman_split(&graph, 6);
        assert_eq!(nodes.len(), 6);
        assert_eq!(labels.len(), 6);
        assert!(nodes.iter().all(|&v| graph[v].id != 99));
    }

    #[test]
    fn community_sizes_are_sorted_descending() {
        let sizes = community_sizes(&[0, 0, 0, 1, 1, 2]);
        assert_eq!(sizes, vec![3, 2, 1]);
    }
}
