use std::collections::HashMap;

use ragex_core::{EntityId, PageRankConfig, PathFindingConfig};
use tracing::{info, warn};

use crate::store::{EdgeType, GraphStore};

/// Runs PageRank to convergence (§4.5). Teleport distribution is uniform;
/// sink nodes (no outgoing edges) distribute their score uniformly across
/// every node. Output sums to ≈1. Returns an empty map for an empty graph.
pub fn pagerank(store: &GraphStore, cfg: &PageRankConfig) -> HashMap<EntityId, f64> {
    let nodes = store.all_entity_ids();
    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }
    let idx: HashMap<&EntityId, usize> = nodes.iter().enumerate().map(|(i, id)| (id, i)).collect();

    let out_edges: Vec<Vec<usize>> = nodes
        .iter()
        .map(|id| {
            store
                .outgoing(id, None)
                .into_iter()
                .filter_map(|e| idx.get(&e.to).copied())
                .collect()
        })
        .collect();

    let mut scores = vec![1.0 / n as f64; n];
    let base = (1.0 - cfg.damping) / n as f64;

    for _ in 0..cfg.max_iterations {
        let sink_mass: f64 = (0..n)
            .filter(|&i| out_edges[i].is_empty())
            .map(|i| scores[i])
            .sum();
        let sink_share = cfg.damping * sink_mass / n as f64;

        let mut next = vec![base + sink_share; n];
        for (i, targets) in out_edges.iter().enumerate() {
            if targets.is_empty() {
                continue;
            }
            let share = cfg.damping * scores[i] / targets.len() as f64;
            for &t in targets {
                next[t] += share;
            }
        }

        let max_delta = next
            .iter()
            .zip(scores.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);
        scores = next;
        if max_delta < cfg.tolerance {
            break;
        }
    }

    nodes.into_iter().zip(scores).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Degree {
    pub in_degree: usize,
    pub out_degree: usize,
    pub total_degree: usize,
}

/// Degree centrality for every node in the graph, O(V + E) (§4.5).
pub fn degree_centrality(store: &GraphStore) -> HashMap<EntityId, Degree> {
    store
        .all_entity_ids()
        .into_iter()
        .map(|id| {
            let in_degree = store.in_degree(&id);
            let out_degree = store.out_degree(&id);
            let d = Degree {
                in_degree,
                out_degree,
                total_degree: in_degree + out_degree,
            };
            (id, d)
        })
        .collect()
}

/// Bounded-DFS path finding between two entities over `calls` edges
/// (§4.5). Depth is measured in edges; a path of N nodes has N-1 edges.
/// Halts as soon as `max_paths` complete paths are recorded. Emits a
/// dense-node warning/info when `out_degree(from)` crosses the configured
/// thresholds, unless suppressed.
pub fn find_paths(
    store: &GraphStore,
    from: &EntityId,
    to: &EntityId,
    cfg: &PathFindingConfig,
) -> Vec<Vec<EntityId>> {
    if from == to {
        return vec![vec![from.clone()]];
    }

    if cfg.warn_dense {
        let out_degree = store.out_degree(from);
        if out_degree >= cfg.dense_warn_threshold as usize {
            warn!(out_degree, node = %from, "dense node encountered in find_paths");
        } else if out_degree >= cfg.dense_info_threshold as usize {
            info!(out_degree, node = %from, "moderately dense node encountered in find_paths");
        }
    }

    let mut results = Vec::new();
    let mut path = vec![from.clone()];
    let mut visited = std::collections::HashSet::new();
    visited.insert(from.clone());

    dfs(
        store,
        to,
        cfg.max_depth as usize,
        cfg.max_paths as usize,
        &mut path,
        &mut visited,
        &mut results,
    );

    results
}

fn dfs(
    store: &GraphStore,
    to: &EntityId,
    max_depth: usize,
    max_paths: usize,
    path: &mut Vec<EntityId>,
    visited: &mut std::collections::HashSet<EntityId>,
    results: &mut Vec<Vec<EntityId>>,
) {
    if results.len() >= max_paths {
        return;
    }
    let current = path.last().expect("path always has ≥1 node").clone();
    let depth = path.len() - 1;
    if depth >= max_depth {
        return;
    }

    for edge in store.outgoing(&current, Some(EdgeType::Calls)) {
        if results.len() >= max_paths {
            return;
        }
        if visited.contains(&edge.to) {
            continue;
        }
        path.push(edge.to.clone());
        if &edge.to == to {
            results.push(path.clone());
        } else {
            visited.insert(edge.to.clone());
            dfs(store, to, max_depth, max_paths, path, visited, results);
            visited.remove(&edge.to);
        }
        path.pop();
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphStatsReport {
    pub node_count: usize,
    pub node_counts_by_type: HashMap<&'static str, usize>,
    pub edge_count: usize,
    pub average_degree: f64,
    pub density: f64,
    pub top_nodes: Vec<(EntityId, f64)>,
}

/// Graph-level statistics including the top-10 nodes by PageRank (§4.5).
pub fn graph_stats(store: &GraphStore, pagerank_cfg: &PageRankConfig) -> GraphStatsReport {
    let stats = store.stats();
    let n = stats.nodes as f64;
    let e = stats.edges as f64;
    let average_degree = if n > 0.0 { 2.0 * e / n } else { 0.0 };
    let density = if n > 1.0 { e / (n * (n - 1.0)) } else { 0.0 };

    let mut ranks: Vec<(EntityId, f64)> = pagerank(store, pagerank_cfg).into_iter().collect();
    ranks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));
    ranks.truncate(10);

    GraphStatsReport {
        node_count: stats.nodes,
        node_counts_by_type: stats.by_type,
        edge_count: stats.edges,
        average_degree,
        density,
        top_nodes: ranks,
    }
}
