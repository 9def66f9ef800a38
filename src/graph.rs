//! In-memory directed graph over the store, plus spreading activation.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::db::MemoryDB;
use crate::error::MemoryError;

/// Snapshot of the node/edge tables. Rebuilt per query, never cached.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    /// node id -> outgoing (target, weight), sorted by target id.
    adjacency: HashMap<i64, Vec<(i64, f64)>>,
}

impl MemoryGraph {
    pub fn build(db: &MemoryDB) -> Result<Self, MemoryError> {
        let mut adjacency: HashMap<i64, Vec<(i64, f64)>> =
            db.all_nodes()?.into_iter().map(|id| (id, Vec::new())).collect();
        // all_edges is ordered by (from_id, to_id), so each list comes out sorted.
        for e in db.all_edges()? {
            adjacency.entry(e.from_id).or_default().push((e.to_id, e.weight));
        }
        let graph = Self { adjacency };
        tracing::debug!(nodes = graph.node_count(), edges = graph.edge_count(), "graph built");
        Ok(graph)
    }

    /// Build from explicit parts. Edges whose endpoints are not in `nodes`
    /// are dropped.
    pub fn from_parts(nodes: impl IntoIterator<Item = i64>, edges: &[(i64, i64, f64)]) -> Self {
        let mut adjacency: HashMap<i64, Vec<(i64, f64)>> =
            nodes.into_iter().map(|id| (id, Vec::new())).collect();
        for &(from, to, w) in edges {
            if !adjacency.contains_key(&to) {
                continue;
            }
            if let Some(list) = adjacency.get_mut(&from) {
                match list.iter_mut().find(|(t, _)| *t == to) {
                    Some(slot) => slot.1 = w,
                    None => list.push((to, w)),
                }
            }
        }
        for list in adjacency.values_mut() {
            list.sort_by_key(|(t, _)| *t);
        }
        Self { adjacency }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.adjacency.contains_key(&id)
    }

    pub fn neighbors(&self, id: i64) -> &[(i64, f64)] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }
}

/// Nodes reachable from `seed` in at most `max_depth` hops along edge
/// direction, excluding the seed itself. Weights are ignored.
pub fn spread(graph: &MemoryGraph, seed: i64, max_depth: usize) -> HashSet<i64> {
    let mut activated = HashSet::new();
    if max_depth == 0 || !graph.contains(seed) {
        return activated;
    }

    let mut visited = HashSet::from([seed]);
    let mut queue = VecDeque::from([(seed, 0usize)]);
    while let Some((node, depth)) = queue.pop_front() {
        if depth == max_depth {
            continue;
        }
        for &(next, _) in graph.neighbors(node) {
            if visited.insert(next) {
                activated.insert(next);
                queue.push_back((next, depth + 1));
            }
        }
    }
    activated
}
