// Louvain community detection on a bucket graph.
//
// Classic two-phase Louvain (Blondel et al. 2008): move single nodes to the
// neighbouring community with the best modularity gain until nothing moves,
// then collapse each community into one node and repeat on the smaller graph.
//
// The result must be reproducible, so nodes are visited in index order,
// neighbouring communities are tried in ascending order, a node only leaves
// its community for a strictly better gain, and equal gains go to the lower
// community id. With sorted account ids as node indices, the same bucket
// always yields the same partition.

use std::collections::BTreeMap;

use super::assemble::BucketGraph;

/// Gains closer than this are treated as equal.
const GAIN_EPSILON: f64 = 1e-12;

/// A weighted graph at one Louvain level. Community-internal weight is
/// carried as a self-loop once communities have been collapsed.
struct Level {
    adjacency: Vec<BTreeMap<usize, f64>>,
    self_loops: Vec<f64>,
}

impl Level {
    fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// Weighted degree; a self-loop counts twice.
    fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].values().sum::<f64>() + 2.0 * self.self_loops[node]
    }
}

/// Partition the graph into communities.
///
/// Returns node-index lists, each sorted, ordered by size descending and then
/// by smallest member. Isolated accounts come back as singletons.
pub fn louvain(graph: &BucketGraph, resolution: f64) -> Vec<Vec<usize>> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let mut level = Level {
        adjacency: vec![BTreeMap::new(); n],
        self_loops: vec![0.0; n],
    };
    for (a, b, edge) in graph.edge_endpoints() {
        if edge.weight <= 0.0 || a == b {
            continue;
        }
        *level.adjacency[a].entry(b).or_default() += edge.weight;
        *level.adjacency[b].entry(a).or_default() += edge.weight;
    }

    // Community of each original node
    let mut membership: Vec<usize> = (0..n).collect();

    let total: f64 = (0..n).map(|i| level.degree(i)).sum();
    if total > 0.0 {
        loop {
            let (community, moved) = local_moving(&level, resolution, total);
            if !moved {
                break;
            }
            let (renumbered, count) = renumber(&community);
            for m in membership.iter_mut() {
                *m = renumbered[*m];
            }
            level = aggregate(&level, &renumbered, count);
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, community) in membership.into_iter().enumerate() {
        groups.entry(community).or_default().push(node);
    }
    let mut communities: Vec<Vec<usize>> = groups.into_values().collect();
    communities.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
    communities
}

/// Phase one: greedy node moves. Returns each node's community and whether
/// any node moved.
fn local_moving(level: &Level, resolution: f64, total: f64) -> (Vec<usize>, bool) {
    let n = level.len();
    let degrees: Vec<f64> = (0..n).map(|i| level.degree(i)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut community_total: Vec<f64> = degrees.clone();
    let mut moved_any = false;

    loop {
        let mut moved = false;
        for node in 0..n {
            let k = degrees[node];
            if k == 0.0 {
                continue;
            }
            let current = community[node];

            // Weight from this node into each neighbouring community
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for (&neighbour, &w) in &level.adjacency[node] {
                *links.entry(community[neighbour]).or_default() += w;
            }

            community_total[current] -= k;
            let gain = |c: usize, links_in: f64| -> f64 {
                links_in - resolution * community_total[c] * k / total
            };

            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&candidate, &links_in) in &links {
                let g = gain(candidate, links_in);
                if g > best_gain + GAIN_EPSILON {
                    best = candidate;
                    best_gain = g;
                }
            }

            community_total[best] += k;
            if best != current {
                community[node] = best;
                moved = true;
                moved_any = true;
            }
        }
        if !moved {
            break;
        }
    }

    (community, moved_any)
}

/// Map community labels to 0..count in order of first appearance.
fn renumber(community: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    let mut renumbered = Vec::with_capacity(community.len());
    for &c in community {
        let next = mapping.len();
        renumbered.push(*mapping.entry(c).or_insert(next));
    }
    (renumbered, mapping.len())
}

/// Phase two: collapse each community into a single node.
fn aggregate(level: &Level, community: &[usize], count: usize) -> Level {
    let mut next = Level {
        adjacency: vec![BTreeMap::new(); count],
        self_loops: vec![0.0; count],
    };
    for node in 0..level.len() {
        let c = community[node];
        next.self_loops[c] += level.self_loops[node];
        for (&neighbour, &w) in &level.adjacency[node] {
            // Each undirected edge appears twice in the adjacency lists
            if neighbour < node {
                continue;
            }
            let d = community[neighbour];
            if c == d {
                next.self_loops[c] += w;
            } else {
                *next.adjacency[c].entry(d).or_default() += w;
                *next.adjacency[d].entry(c).or_default() += w;
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edges::{Edge, Signal, SignalType};

    fn edge(a: &str, b: &str, weight: f64) -> Edge {
        Edge {
            account_a: a.to_string(),
            account_b: b.to_string(),
            weight,
            signals: vec![Signal {
                signal_type: SignalType::SynchronizedPosting,
                weight,
            }],
        }
    }

    fn triangle(x: &str, y: &str, z: &str) -> Vec<Edge> {
        vec![edge(x, y, 1.0), edge(y, z, 1.0), edge(x, z, 1.0)]
    }

    #[test]
    fn test_two_triangles_with_bridge() {
        let mut edges = triangle("a1", "a2", "a3");
        edges.extend(triangle("b1", "b2", "b3"));
        edges.push(edge("a3", "b1", 0.2));
        let graph = BucketGraph::from_edges(Vec::<String>::new(), edges);

        let communities = louvain(&graph, 1.0);
        assert_eq!(communities.len(), 2, "got {communities:?}");
        assert_eq!(communities[0], vec![0, 1, 2]);
        assert_eq!(communities[1], vec![3, 4, 5]);
    }

    #[test]
    fn test_isolated_nodes_are_singletons() {
        let graph = BucketGraph::from_edges(["a", "b", "c", "x", "y"], triangle("a", "b", "c"));
        let communities = louvain(&graph, 1.0);
        assert_eq!(communities, vec![vec![0, 1, 2], vec![3], vec![4]]);
    }

    #[test]
    fn test_no_edges() {
        let graph = BucketGraph::from_edges(["a", "b"], Vec::new());
        assert_eq!(louvain(&graph, 1.0), vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_deterministic() {
        let mut edges = triangle("p", "q", "r");
        edges.push(edge("r", "s", 1.0));
        edges.push(edge("s", "t", 1.0));
        let graph = BucketGraph::from_edges(Vec::<String>::new(), edges);
        let first = louvain(&graph, 1.0);
        for _ in 0..5 {
            assert_eq!(louvain(&graph, 1.0), first);
        }
    }

    #[test]
    fn test_every_node_assigned_once() {
        let mut edges = triangle("a", "b", "c");
        edges.extend(triangle("c", "d", "e"));
        edges.push(edge("e", "f", 2.0));
        let graph = BucketGraph::from_edges(["g"], edges);
        let communities = louvain(&graph, 1.0);
        let mut all: Vec<usize> = communities.concat();
        all.sort_unstable();
        assert_eq!(all, (0..graph.node_count()).collect::<Vec<_>>());
    }
}
