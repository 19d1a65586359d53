//! Graph Connectivity
//!
//! Breadth-first traversal and connected-component partitioning over any
//! type implementing [`GraphModel`]. Implementations are provided for
//! petgraph's `Graph` and `StableGraph`, traversing edges undirected.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use petgraph::graph::{Graph, IndexType, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::EdgeType;

/// Abstract view of a graph: its vertices and their neighbours.
///
/// For connectivity, `adjacent` must report neighbours in both edge
/// directions.
pub trait GraphModel {
    type Node: Clone + Eq + Hash;

    fn nodes(&self) -> Vec<Self::Node>;

    fn adjacent(&self, node: &Self::Node) -> Vec<Self::Node>;
}

/// Visit every vertex reachable from `start`, breadth first.
///
/// `on_discovered` is called once per vertex, `start` included, in
/// discovery order. Returns the vertices in that order.
pub fn breadth_first_search<M, F>(model: &M, start: &M::Node, mut on_discovered: F) -> Vec<M::Node>
where
    M: GraphModel + ?Sized,
    F: FnMut(&M::Node),
{
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    let mut order = Vec::new();

    seen.insert(start.clone());
    queue.push_back(start.clone());
    while let Some(node) = queue.pop_front() {
        on_discovered(&node);
        for next in model.adjacent(&node) {
            if seen.insert(next.clone()) {
                queue.push_back(next);
            }
        }
        order.push(node);
    }
    order
}

/// Partition the graph into maximal sets of mutually reachable vertices.
///
/// The set of components is deterministic; their order and the order of
/// discovery within each are not part of the contract.
pub fn find_connected_components<M>(model: &M) -> Vec<HashSet<M::Node>>
where
    M: GraphModel + ?Sized,
{
    let mut undiscovered: HashSet<M::Node> = model.nodes().into_iter().collect();
    let mut components = Vec::new();

    for node in model.nodes() {
        if !undiscovered.contains(&node) {
            continue;
        }
        let mut component = HashSet::new();
        breadth_first_search(model, &node, |found| {
            undiscovered.remove(found);
            component.insert(found.clone());
        });
        components.push(component);
    }
    components
}

impl<N, E, Ty: EdgeType, Ix: IndexType> GraphModel for Graph<N, E, Ty, Ix> {
    type Node = NodeIndex<Ix>;

    fn nodes(&self) -> Vec<Self::Node> {
        self.node_indices().collect()
    }

    fn adjacent(&self, node: &Self::Node) -> Vec<Self::Node> {
        self.neighbors_undirected(*node).collect()
    }
}

impl<N, E, Ty: EdgeType, Ix: IndexType> GraphModel for StableGraph<N, E, Ty, Ix> {
    type Node = NodeIndex<Ix>;

    fn nodes(&self) -> Vec<Self::Node> {
        self.node_indices().collect()
    }

    fn adjacent(&self, node: &Self::Node) -> Vec<Self::Node> {
        self.neighbors_undirected(*node).collect()
    }
}
