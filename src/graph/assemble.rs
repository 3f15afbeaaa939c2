// Graph assembly: one weighted, undirected account graph per bucket.
//
// Nodes are the distinct accounts with at least one post in the bucket, added
// in sorted id order so node indices (and everything downstream of them) are
// the same on every run. Edges carry the full `Edge` for explainability.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use super::edges::{Edge, EdgeBuilder, SignalType};
use crate::config::CoordinationConfig;
use crate::platforms::Post;

pub struct BucketGraph {
    graph: UnGraph<String, Edge>,
    index: HashMap<String, NodeIndex>,
    text_similarity_skipped: bool,
}

impl BucketGraph {
    /// Build the graph for one bucket's posts.
    pub fn assemble(posts: &[Post], config: &CoordinationConfig) -> Self {
        let accounts: BTreeSet<&str> = posts.iter().map(|p| p.account_id.as_str()).collect();
        let edge_set = EdgeBuilder::new(config).build(posts);

        let mut graph = Self::from_edges(accounts, edge_set.edges);
        graph.text_similarity_skipped = edge_set.text_similarity_skipped;
        graph
    }

    /// Build a graph from an explicit account list and edge list.
    ///
    /// Accounts referenced by an edge are added even if missing from
    /// `accounts`.
    pub fn from_edges<I, S>(accounts: I, edges: Vec<Edge>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids: BTreeSet<String> = accounts.into_iter().map(|a| a.as_ref().to_string()).collect();
        for edge in &edges {
            ids.insert(edge.account_a.clone());
            ids.insert(edge.account_b.clone());
        }

        let mut graph = UnGraph::<String, Edge>::with_capacity(ids.len(), edges.len());
        let mut index = HashMap::with_capacity(ids.len());
        for id in ids {
            let node = graph.add_node(id.clone());
            index.insert(id, node);
        }
        for edge in edges {
            let (a, b) = (index[&edge.account_a], index[&edge.account_b]);
            graph.add_edge(a, b, edge);
        }

        Self {
            graph,
            index,
            text_similarity_skipped: false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Account ids in node-index order (sorted).
    pub fn accounts(&self) -> Vec<&str> {
        self.graph.node_weights().map(String::as_str).collect()
    }

    /// Account id of node `i`.
    pub fn account(&self, i: usize) -> &str {
        &self.graph[NodeIndex::new(i)]
    }

    pub fn node_index(&self, account: &str) -> Option<usize> {
        self.index.get(account).map(|n| n.index())
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Edges as (node, node, edge) triples.
    pub fn edge_endpoints(&self) -> impl Iterator<Item = (usize, usize, &Edge)> {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), e.weight()))
    }

    pub fn edge_between(&self, a: &str, b: &str) -> Option<&Edge> {
        let (a, b) = (self.index.get(a)?, self.index.get(b)?);
        self.graph
            .find_edge(*a, *b)
            .and_then(|e| self.graph.edge_weight(e))
    }

    pub fn text_similarity_skipped(&self) -> bool {
        self.text_similarity_skipped
    }

    /// Account pairs carrying a given signal.
    pub fn signal_pair_count(&self, signal: SignalType) -> usize {
        self.edges().filter(|e| e.has(signal)).count()
    }

    pub fn synchronized_pair_count(&self) -> usize {
        self.signal_pair_count(SignalType::SynchronizedPosting)
    }

    /// n·(n-1)/2 for the bucket's account count.
    pub fn possible_pairs(&self) -> usize {
        let n = self.node_count();
        n * n.saturating_sub(1) / 2
    }

    /// Edges among `members` (node indices).
    pub fn edges_within(&self, members: &[usize]) -> Vec<&Edge> {
        let set: BTreeSet<usize> = members.iter().copied().collect();
        self.edge_endpoints()
            .filter(|(a, b, _)| set.contains(a) && set.contains(b))
            .map(|(_, _, e)| e)
            .collect()
    }

    /// Edges present / possible edges among `members`. 0 for fewer than two.
    pub fn subgraph_density(&self, members: &[usize]) -> f64 {
        let n = members.len();
        if n < 2 {
            return 0.0;
        }
        let possible = (n * (n - 1) / 2) as f64;
        self.edges_within(members).len() as f64 / possible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edges::Signal;

    fn edge(a: &str, b: &str, signal: SignalType, weight: f64) -> Edge {
        Edge {
            account_a: a.to_string(),
            account_b: b.to_string(),
            weight,
            signals: vec![Signal {
                signal_type: signal,
                weight,
            }],
        }
    }

    #[test]
    fn test_nodes_sorted_and_isolated_kept() {
        let graph = BucketGraph::from_edges(
            ["zed", "amy", "kim"],
            vec![edge("amy", "kim", SignalType::UrlSharing, 1.5)],
        );
        assert_eq!(graph.accounts(), vec!["amy", "kim", "zed"]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.possible_pairs(), 3);
        assert!(graph.edge_between("kim", "amy").is_some());
        assert!(graph.edge_between("amy", "zed").is_none());
    }

    #[test]
    fn test_density_of_subgraph() {
        let graph = BucketGraph::from_edges(
            ["a", "b", "c", "d"],
            vec![
                edge("a", "b", SignalType::SynchronizedPosting, 1.0),
                edge("b", "c", SignalType::SynchronizedPosting, 1.0),
            ],
        );
        assert!((graph.subgraph_density(&[0, 1, 2]) - 2.0 / 3.0).abs() < 1e-9);
        assert!((graph.subgraph_density(&[0, 1, 2, 3]) - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(graph.subgraph_density(&[0]), 0.0);
        assert_eq!(graph.synchronized_pair_count(), 2);
        assert_eq!(graph.signal_pair_count(SignalType::UrlSharing), 0);
    }

    #[test]
    fn test_empty_graph() {
        let graph = BucketGraph::from_edges(Vec::<String>::new(), Vec::new());
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.possible_pairs(), 0);
    }
}
