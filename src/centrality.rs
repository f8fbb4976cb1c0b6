//! Centrality measures over the built road network: degree, weighted
//! betweenness (edge weight as distance cost) and eigenvector (edge weight
//! as connection strength). Rankings are recomputed from scratch each run
//! and persisted as a CSV table.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fs;
use std::path::PathBuf;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rustworkx_core::centrality::eigenvector_centrality;
use serde::Serialize;
use tracing::{info, warn};

use crate::network::{load_and_build, RoadNetwork, WeightMode};
use crate::{DataPaths, Error, Result, CENTRALITY_RANKINGS};

const EIGENVECTOR_MAX_ITER: usize = 10_000;
const EIGENVECTOR_TOL: f64 = 1e-4;

/// Scores per measure, indexed by the graph's node indices.
#[derive(Debug)]
pub struct CentralityReport {
    pub degree: Vec<f64>,
    pub betweenness: Vec<f64>,
    pub eigenvector: Vec<f64>,
}

/// `(in_degree + out_degree) / (n - 1)` per node, parallel edges counted.
#[must_use]
pub fn degree_centrality(graph: &RoadNetwork) -> Vec<f64> {
    let n = graph.node_count();
    if n <= 1 {
        return vec![0.0; n];
    }

    let scale = 1.0 / (n as f64 - 1.0);
    graph
        .node_indices()
        .map(|v| {
            let degree = graph.edges_directed(v, Direction::Outgoing).count()
                + graph.edges_directed(v, Direction::Incoming).count();
            degree as f64 * scale
        })
        .collect()
}

// Min-heap entry for the Dijkstra stage of the Brandes accumulation
#[derive(Copy, Clone, PartialEq)]
struct QueueEntry {
    cost: f64,
    node: NodeIndex,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap by cost (reversed from standard Rust BinaryHeap)
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Weighted betweenness centrality: Brandes accumulation over one Dijkstra
/// tree per source, normalized by `(n-1)(n-2)` for the directed graph.
#[must_use]
pub fn betweenness_centrality(graph: &RoadNetwork) -> Vec<f64> {
    let n = graph.node_count();
    let mut scores = vec![0.0; n];
    if n < 3 {
        return scores;
    }

    for source in graph.node_indices() {
        let s = source.index();
        let mut dist = vec![f64::INFINITY; n];
        let mut sigma = vec![0.0f64; n];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut order: Vec<usize> = Vec::with_capacity(n);
        let mut settled = vec![false; n];

        dist[s] = 0.0;
        sigma[s] = 1.0;
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry {
            cost: 0.0,
            node: source,
        });

        while let Some(QueueEntry { cost, node }) = heap.pop() {
            let v = node.index();
            if settled[v] {
                continue;
            }
            settled[v] = true;
            order.push(v);

            for edge in graph.edges(node) {
                let w = edge.target().index();
                let next = cost + edge.weight().weight;
                if next < dist[w] {
                    dist[w] = next;
                    sigma[w] = sigma[v];
                    preds[w].clear();
                    preds[w].push(v);
                    heap.push(QueueEntry {
                        cost: next,
                        node: edge.target(),
                    });
                } else if next == dist[w] {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        // dependency accumulation in reverse settle order
        let mut delta = vec![0.0f64; n];
        for &w in order.iter().rev() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                scores[w] += delta[w];
            }
        }
    }

    let scale = 1.0 / ((n as f64 - 1.0) * (n as f64 - 2.0));
    for score in &mut scores {
        *score *= scale;
    }
    scores
}

fn largest_scc(graph: &RoadNetwork) -> Vec<NodeIndex> {
    tarjan_scc(graph)
        .into_iter()
        .max_by_key(Vec::len)
        .unwrap_or_default()
}

fn largest_wcc(graph: &RoadNetwork) -> Vec<NodeIndex> {
    let mut sets = UnionFind::new(graph.node_count());
    for edge in graph.edge_references() {
        sets.union(edge.source().index(), edge.target().index());
    }

    let mut components: HashMap<usize, Vec<NodeIndex>> = HashMap::new();
    for v in graph.node_indices() {
        components.entry(sets.find(v.index())).or_default().push(v);
    }
    components
        .into_values()
        .max_by_key(Vec::len)
        .unwrap_or_default()
}

fn directed_subgraph(graph: &RoadNetwork, nodes: &[NodeIndex]) -> DiGraph<NodeIndex, f64> {
    let mut sub = DiGraph::new();
    let mut map = HashMap::new();
    for &v in nodes {
        map.insert(v, sub.add_node(v));
    }
    for edge in graph.edge_references() {
        if let (Some(&a), Some(&b)) = (map.get(&edge.source()), map.get(&edge.target())) {
            sub.add_edge(a, b, edge.weight().weight);
        }
    }
    sub
}

fn undirected_subgraph(graph: &RoadNetwork, nodes: &[NodeIndex]) -> UnGraph<NodeIndex, f64> {
    let mut sub = UnGraph::new_undirected();
    let mut map = HashMap::new();
    for &v in nodes {
        map.insert(v, sub.add_node(v));
    }
    for edge in graph.edge_references() {
        if let (Some(&a), Some(&b)) = (map.get(&edge.source()), map.get(&edge.target())) {
            sub.add_edge(a, b, edge.weight().weight);
        }
    }
    sub
}

fn try_directed(
    sub: &DiGraph<NodeIndex, f64>,
    max_iter: usize,
    tol: f64,
) -> Option<Vec<f64>> {
    let result: rustworkx_core::Result<Option<Vec<f64>>> =
        eigenvector_centrality(sub, |e| Ok(*e.weight()), Some(max_iter), Some(tol));
    match result {
        Ok(Some(scores)) => Some(scores),
        _ => None,
    }
}

fn try_undirected(
    sub: &UnGraph<NodeIndex, f64>,
    weighted: bool,
    max_iter: usize,
    tol: f64,
) -> Option<Vec<f64>> {
    let result: rustworkx_core::Result<Option<Vec<f64>>> = if weighted {
        eigenvector_centrality(sub, |e| Ok(*e.weight()), Some(max_iter), Some(tol))
    } else {
        eigenvector_centrality(sub, |_| Ok(1.0), Some(max_iter), Some(tol))
    };
    match result {
        Ok(Some(scores)) => Some(scores),
        _ => None,
    }
}

fn attempt(label: &str, result: Option<Vec<f64>>) -> Option<Vec<f64>> {
    match result {
        Some(scores) => {
            info!("eigenvector converged on {}", label);
            Some(scores)
        }
        None => {
            warn!("eigenvector failed to converge on {} (max_iter reached)", label);
            None
        }
    }
}

/// Eigenvector centrality on the largest strongly connected component,
/// falling back to the largest weakly connected component when the largest
/// SCC is trivial. Power iteration is retried on progressively easier
/// variants; if every attempt fails to converge the whole column degrades
/// to zeros with a warning instead of aborting the run.
#[must_use]
pub fn eigenvector_centrality_scores(graph: &RoadNetwork) -> Vec<f64> {
    let n = graph.node_count();
    let mut full = vec![0.0; n];
    if n == 0 {
        return full;
    }

    info!("computing eigenvector centrality on the largest connected component...");
    let scc = largest_scc(graph);
    let (component, kind) = if scc.len() > 1 {
        (scc, "strongly")
    } else {
        (largest_wcc(graph), "weakly")
    };
    info!(
        "using {} connected component with {} nodes",
        kind,
        component.len()
    );

    let directed = directed_subgraph(graph, &component);
    let undirected = undirected_subgraph(graph, &component);

    let mut scores = None;
    if kind == "weakly" {
        scores = attempt(
            "weakly component (undirected, weighted)",
            try_undirected(&undirected, true, EIGENVECTOR_MAX_ITER, EIGENVECTOR_TOL),
        );
    }
    let scores = scores
        .or_else(|| {
            attempt(
                "component (directed, weighted)",
                try_directed(&directed, EIGENVECTOR_MAX_ITER, EIGENVECTOR_TOL),
            )
        })
        .or_else(|| {
            attempt(
                "component (undirected, weighted)",
                try_undirected(&undirected, true, EIGENVECTOR_MAX_ITER, EIGENVECTOR_TOL),
            )
        })
        .or_else(|| {
            attempt(
                "component (undirected, unweighted)",
                try_undirected(&undirected, false, EIGENVECTOR_MAX_ITER, EIGENVECTOR_TOL),
            )
        })
        .or_else(|| {
            info!("final attempt with relaxed tolerance on undirected component...");
            attempt(
                "component (undirected, relaxed)",
                try_undirected(&undirected, false, 20_000, 1e-3),
            )
        });

    match scores {
        Some(values) => {
            // nodes outside the component keep a 0.0 score
            for (i, &original) in component.iter().enumerate() {
                full[original.index()] = values[i];
            }
        }
        None => warn!(
            "eigenvector centrality failed to converge after multiple attempts, \
             reporting zero scores"
        ),
    }

    full
}

fn log_top_scores(graph: &RoadNetwork, name: &str, scores: &[f64]) {
    let mut ranked: Vec<usize> = (0..scores.len()).collect();
    ranked.sort_by(|a, b| scores[*b].partial_cmp(&scores[*a]).unwrap_or(Ordering::Equal));

    info!("top nodes by {} centrality:", name);
    for (rank, &i) in ranked.iter().take(10).enumerate() {
        let node = &graph[NodeIndex::new(i)];
        info!("{:2}. node {}: {:.6}", rank + 1, node.id, scores[i]);
    }
}

fn log_stats(name: &str, scores: &[f64]) {
    if scores.is_empty() {
        return;
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    info!(
        "{} stats: min {:.6}, max {:.6}, mean {:.6}",
        name, min, max, mean
    );
}

/// Compute all three measures with progress logging.
pub fn compute_centrality(graph: &RoadNetwork) -> Result<CentralityReport> {
    if graph.node_count() == 0 {
        return Err(Error::EmptyGraph);
    }

    info!("computing degree centrality...");
    let degree = degree_centrality(graph);
    log_top_scores(graph, "degree", &degree);
    log_stats("degree", &degree);

    info!("computing betweenness centrality by weight...");
    let betweenness = betweenness_centrality(graph);
    log_top_scores(graph, "betweenness", &betweenness);
    log_stats("betweenness", &betweenness);

    let eigenvector = eigenvector_centrality_scores(graph);
    log_top_scores(graph, "eigenvector", &eigenvector);
    log_stats("eigenvector", &eigenvector);

    Ok(CentralityReport {
        degree,
        betweenness,
        eigenvector,
    })
}

#[derive(Debug, Serialize)]
struct RankingRow {
    node_id: i64,
    degree: f64,
    betweenness: f64,
    eigenvector: f64,
}

/// Persist the full ranking table, sorted by (eigenvector, betweenness,
/// degree) descending.
pub fn save_centrality_rankings(
    graph: &RoadNetwork,
    report: &CentralityReport,
    paths: &DataPaths,
) -> Result<PathBuf> {
    fs::create_dir_all(&paths.processed)?;
    let path = paths.processed_file(CENTRALITY_RANKINGS);

    let mut rows: Vec<RankingRow> = graph
        .node_indices()
        .map(|v| {
            let i = v.index();
            RankingRow {
                node_id: graph[v].id,
                degree: report.degree[i],
                betweenness: report.betweenness[i],
                eigenvector: report.eigenvector[i],
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.eigenvector
            .partial_cmp(&a.eigenvector)
            .unwrap_or(Ordering::Equal)
            .then(
                b.betweenness
                    .partial_cmp(&a.betweenness)
                    .unwrap_or(Ordering::Equal),
            )
            .then(b.degree.partial_cmp(&a.degree).unwrap_or(Ordering::Equal))
    });

    let mut writer = csv::Writer::from_path(&path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("centrality rankings saved to {}", path.display());
    Ok(path)
}

/// Full reporter stage: build the graph with the given mode, compute the
/// three measures and persist the ranking table.
pub fn run_centrality_analysis(paths: &DataPaths, mode: WeightMode) -> Result<()> {
    info!("building graph and computing centrality measures...");
    let graph = load_and_build(paths, mode)?;
    let report = compute_centrality(&graph)?;
    save_centrality_rankings(&graph, &report, paths)?;
    info!("centrality analysis complete");
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

    /// Directed 3-cycle with distinct weights 1, 2, 3.
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

    #[test]
    fn triangle_degree_centrality() {
        let graph = triangle();
        let degree = degree_centrality(&graph);
        assert_eq!(degree, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn higher_degree_never_ranks_lower() {
        // star: hub 0 with three outgoing spokes
        let mut graph = RoadNetwork::new();
        let hub = graph.add_node(intersection(0));
        for id in 1..=3 {
            let leaf = graph.add_node(intersection(id));
            graph.add_edge(hub, leaf, segment(id, 1.0));
        }

        let degree = degree_centrality(&graph);
        for leaf in 1..=3 {
            assert!(degree[0] > degree[leaf]);
        }
    }

    #[test]
    fn triangle_betweenness_matches_hand_computed_value() {
        // each node is interior to exactly one of the six ordered shortest
        // paths, so every normalized score is 1 / ((n-1)(n-2)) = 0.5
        let graph = triangle();
        let betweenness = betweenness_centrality(&graph);
        assert_eq!(betweenness, vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn betweenness_follows_the_cheaper_weighted_path() {
        // a -> b -> c costs 2, the direct a -> c edge costs 10, so b is on
        // the only shortest a..c path
        let mut graph = RoadNetwork::new();
        let a = graph.add_node(intersection(1));
        let b = graph.add_node(intersection(2));
        let c = graph.add_node(intersection(3));
        graph.add_edge(a, b, segment(10, 1.0));
        graph.add_edge(b, c, segment(11, 1.0));
        graph.add_edge(a, c, segment(12, 10.0));

        let betweenness = betweenness_centrality(&graph);
        assert_eq!(betweenness, vec![0.0, 0.5, 0.0]);
    }

    #[test]
    fn eigenvector_scores_cover_the_component() {
        let graph = triangle();
        let scores = eigenvector_centrality_scores(&graph);
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|s| s.is_finite() && *s >= 0.0));
        assert!(scores.iter().any(|s| *s > 0.0));
    }

    #[test]
    fn eigenvector_is_zero_outside_the_largest_component() {
        let mut graph = triangle();
        let d = graph.add_node(intersection(4));
        let a = NodeIndex::new(0);
        graph.add_edge(d, a, segment(13, 1.0));

        let scores = eigenvector_centrality_scores(&graph);
        assert_eq!(scores[d.index()], 0.0);
        assert!(scores[a.index()] > 0.0);
    }

    #[test]
    fn empty_graph_is_rejected() {
        let graph = RoadNetwork::new();
        assert!(matches!(compute_centrality(&graph), Err(Error::EmptyGraph)));
    }
}
